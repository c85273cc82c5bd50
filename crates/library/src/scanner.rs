use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "opus", "m4a"];

#[derive(Debug)]
pub enum Candidate {
    Audio(PathBuf),
    /// A directory entry the walk could not read. The walk goes on past it.
    Unreadable {
        path: Option<PathBuf>,
        error: String,
    },
}

/// Lazily walks each root in turn, sorted by file name, yielding audio files.
pub struct AudioFiles {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<walkdir::IntoIter>,
}

impl AudioFiles {
    pub fn new<I: IntoIterator<Item = PathBuf>>(roots: I) -> Self {
        let roots: Vec<PathBuf> = roots.into_iter().collect();
        Self {
            roots: roots.into_iter(),
            current: None,
        }
    }
}

impl Iterator for AudioFiles {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            if let Some(walker) = self.current.as_mut() {
                match walker.next() {
                    Some(Ok(entry)) => {
                        if entry.file_type().is_file() && is_audio_file(entry.path()) {
                            return Some(Candidate::Audio(entry.into_path()));
                        }
                        continue;
                    }
                    Some(Err(err)) => {
                        return Some(Candidate::Unreadable {
                            path: err.path().map(Path::to_path_buf),
                            error: err.to_string(),
                        });
                    }
                    None => self.current = None,
                }
            }

            let root = self.roots.next()?;
            self.current = Some(
                WalkDir::new(root)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter(),
            );
        }
    }
}

pub fn is_audio_file(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Upper-cased extension, e.g. `FLAC`.
pub fn audio_format(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_uppercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::{audio_format, is_audio_file, AudioFiles, Candidate};

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn audio_paths(files: AudioFiles) -> Vec<PathBuf> {
        files
            .filter_map(|c| match c {
                Candidate::Audio(path) => Some(path),
                Candidate::Unreadable { .. } => None,
            })
            .collect()
    }

    #[test]
    fn filters_by_extension_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b/02.flac"));
        touch(&root.join("b/01.MP3"));
        touch(&root.join("b/01.lrc"));
        touch(&root.join("b/cover.jpg"));
        touch(&root.join("a/deep/x/track.wav"));
        touch(&root.join("notes"));

        let found = audio_paths(AudioFiles::new(vec![root.to_path_buf()]));
        assert_eq!(
            found,
            vec![
                root.join("a/deep/x/track.wav"),
                root.join("b/01.MP3"),
                root.join("b/02.flac"),
            ]
        );
    }

    #[test]
    fn walks_every_root_and_reports_missing_ones() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&first.path().join("one.mp3"));
        touch(&second.path().join("two.ogg"));
        let missing = first.path().join("does-not-exist");

        let candidates: Vec<Candidate> = AudioFiles::new(vec![
            first.path().to_path_buf(),
            missing.clone(),
            second.path().to_path_buf(),
        ])
        .collect();

        assert_eq!(candidates.len(), 3);
        assert!(matches!(&candidates[0], Candidate::Audio(p) if p.ends_with("one.mp3")));
        assert!(matches!(&candidates[1], Candidate::Unreadable { path: Some(p), .. } if *p == missing));
        assert!(matches!(&candidates[2], Candidate::Audio(p) if p.ends_with("two.ogg")));
    }

    #[test]
    fn formats_are_upper_cased() {
        assert_eq!(audio_format(Path::new("/m/a.flac")), "FLAC");
        assert_eq!(audio_format(Path::new("/m/a")), "");
        assert!(is_audio_file(Path::new("/m/A.Mp3")));
        assert!(!is_audio_file(Path::new("/m/a.lrc")));
    }
}
