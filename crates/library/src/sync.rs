use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::time::{Instant, UNIX_EPOCH};

use common::{path_key, Album, Track, DEFAULT_COVER_ID};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoverError, LibraryError};
use crate::normalize::{normalize, FileFacts};
use crate::scanner::{AudioFiles, Candidate};
use crate::Library;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    /// Tags could not be read; the file is skipped and retried next run.
    Extraction,
    /// The embedded picture could not be decoded; the file is kept with the default cover.
    Codec,
    /// A directory entry or file attribute could not be read; the entry is skipped.
    Filesystem,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub kind: IssueKind,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub lyrics_refreshed: usize,
    pub unchanged: usize,
    pub albums_created: usize,
    pub covers_written: usize,
    pub issues: Vec<ScanIssue>,
}

impl ScanReport {
    fn merge(&mut self, other: ScanReport) {
        self.added += other.added;
        self.updated += other.updated;
        self.removed += other.removed;
        self.lyrics_refreshed += other.lyrics_refreshed;
        self.unchanged += other.unchanged;
        self.albums_created += other.albums_created;
        self.covers_written += other.covers_written;
        self.issues.extend(other.issues);
    }

    fn push_issue(&mut self, issue: ScanIssue) {
        warn!("{:?} issue for {:?}: {}", issue.kind, issue.path, issue.reason);
        self.issues.push(issue);
    }

    /// Files left out of the catalog this run.
    pub fn skipped(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.kind != IssueKind::Codec)
            .count()
    }

    pub fn issues_of(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind == kind).count()
    }

    pub fn changed(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.removed > 0 || self.lyrics_refreshed > 0
    }
}

#[derive(Debug)]
struct Prepared {
    track: Track,
    album: Album,
    cover_written: bool,
    codec_issue: Option<ScanIssue>,
}

#[derive(Debug)]
enum FileOutcome {
    Ready(Box<Prepared>),
    Skipped(ScanIssue),
}

impl Library {
    /// Reconciles known tracks, then adds new files.
    pub fn sync(&self) -> Result<ScanReport, LibraryError> {
        let started = Instant::now();
        let mut report = self.reconcile_existing()?;
        report.merge(self.scan_new()?);
        info!(
            "Sync done in {}ms: {} added, {} updated, {} removed, {} lyrics refreshed, {} skipped",
            started.elapsed().as_millis(),
            report.added,
            report.updated,
            report.removed,
            report.lyrics_refreshed,
            report.skipped()
        );
        Ok(report)
    }

    /// Walks every catalogued track: drops vanished files, reprocesses files
    /// whose mtime moved, and refreshes `has_lyrics` for every record that
    /// was not rewritten.
    pub fn reconcile_existing(&self) -> Result<ScanReport, LibraryError> {
        let mut report = ScanReport::default();

        for track in self.store.list_tracks()? {
            let path = PathBuf::from(&track.path);
            let metadata = match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => {
                    self.remove_track(&track, &mut report)?;
                    continue;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    self.remove_track(&track, &mut report)?;
                    continue;
                }
                Err(err) => {
                    report.push_issue(filesystem_issue(&path, &err));
                    continue;
                }
            };

            let modified_at = match modified_millis(&metadata) {
                Ok(value) => value,
                Err(err) => {
                    report.push_issue(filesystem_issue(&path, &err));
                    continue;
                }
            };

            if modified_at != track.modified_at {
                debug!("Reprocessing {:?}", path);
                match self.prepare_file(&path)? {
                    FileOutcome::Ready(prepared) => {
                        self.commit_prepared(*prepared, &mut report)?;
                        report.updated += 1;
                        continue;
                    }
                    // The old record stays; its lyrics flag is still refreshed below.
                    FileOutcome::Skipped(issue) => report.push_issue(issue),
                }
            }

            let has_lyrics = lyrics::has_sidecar(&path);
            if has_lyrics != track.has_lyrics {
                if self.store.set_has_lyrics(&track.id, has_lyrics)? {
                    debug!("Lyrics flag for {:?} is now {}", path, has_lyrics);
                    report.lyrics_refreshed += 1;
                }
            } else if modified_at == track.modified_at {
                report.unchanged += 1;
            }
        }

        Ok(report)
    }

    /// Adds every audio file under the roots that has no catalog entry yet.
    /// Extraction and cover work fan out over the configured workers; catalog
    /// writes happen on the calling thread, one transaction per file.
    pub fn scan_new(&self) -> Result<ScanReport, LibraryError> {
        let workers = self.workers.max(1);
        let queue = Mutex::new(AudioFiles::new(self.roots.iter().cloned()));
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Result<FileOutcome, LibraryError>>();

        std::thread::scope(|scope| {
            let queue = &queue;
            let stop = &stop;
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || self.scan_worker(queue, stop, tx));
            }
            drop(tx);

            let mut report = ScanReport::default();
            let mut fatal: Option<LibraryError> = None;

            for message in rx {
                match message {
                    Ok(FileOutcome::Ready(prepared)) => {
                        if fatal.is_some() {
                            continue;
                        }
                        match self.commit_prepared(*prepared, &mut report) {
                            Ok(commit) if commit.track_created => report.added += 1,
                            Ok(_) => report.updated += 1,
                            Err(err) => {
                                stop.store(true, Ordering::Relaxed);
                                fatal = Some(err);
                            }
                        }
                    }
                    Ok(FileOutcome::Skipped(issue)) => report.push_issue(issue),
                    Err(err) => {
                        stop.store(true, Ordering::Relaxed);
                        if fatal.is_none() {
                            fatal = Some(err);
                        }
                    }
                }
            }

            match fatal {
                Some(err) => Err(err),
                None => Ok(report),
            }
        })
    }

    fn scan_worker(
        &self,
        queue: &Mutex<AudioFiles>,
        stop: &AtomicBool,
        tx: Sender<Result<FileOutcome, LibraryError>>,
    ) {
        while !stop.load(Ordering::Relaxed) {
            let candidate = queue.lock().next();
            let candidate = match candidate {
                Some(candidate) => candidate,
                None => break,
            };

            let message = match candidate {
                Candidate::Audio(path) => match self.store.has_path(&path_key(&path)) {
                    Ok(true) => continue,
                    Ok(false) => self.prepare_file(&path),
                    Err(err) => Err(err),
                },
                Candidate::Unreadable { path, error } => Ok(FileOutcome::Skipped(ScanIssue {
                    path: path.unwrap_or_default(),
                    kind: IssueKind::Filesystem,
                    reason: error,
                })),
            };

            let fatal = message.is_err();
            if tx.send(message).is_err() || fatal {
                break;
            }
        }
    }

    /// Extracts tags and caches the cover for one file. Per-file problems come
    /// back as `Skipped`; only cache storage faults are errors.
    fn prepare_file(&self, path: &Path) -> Result<FileOutcome, LibraryError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => return Ok(FileOutcome::Skipped(filesystem_issue(path, &err))),
        };
        let modified_at = match modified_millis(&metadata) {
            Ok(value) => value,
            Err(err) => return Ok(FileOutcome::Skipped(filesystem_issue(path, &err))),
        };

        let tags = match self.reader.read(path) {
            Ok(tags) => tags,
            Err(err) => {
                return Ok(FileOutcome::Skipped(ScanIssue {
                    path: path.to_path_buf(),
                    kind: IssueKind::Extraction,
                    reason: err.to_string(),
                }))
            }
        };

        let mut cover_written = false;
        let mut codec_issue = None;
        let cover_id = match tags.cover.as_deref().filter(|bytes| !bytes.is_empty()) {
            Some(bytes) => match self.covers.store(bytes) {
                Ok(stored) => {
                    cover_written = stored.written;
                    stored.id
                }
                Err(CoverError::Codec(err)) => {
                    codec_issue = Some(ScanIssue {
                        path: path.to_path_buf(),
                        kind: IssueKind::Codec,
                        reason: err.to_string(),
                    });
                    DEFAULT_COVER_ID.to_string()
                }
                Err(err) => return Err(err.into()),
            },
            None => DEFAULT_COVER_ID.to_string(),
        };

        let normalized = normalize(
            &tags,
            FileFacts {
                path,
                modified_at,
                cover_id,
                has_lyrics: lyrics::has_sidecar(path),
            },
        );

        Ok(FileOutcome::Ready(Box::new(Prepared {
            track: normalized.track,
            album: normalized.album,
            cover_written,
            codec_issue,
        })))
    }

    fn commit_prepared(
        &self,
        prepared: Prepared,
        report: &mut ScanReport,
    ) -> Result<crate::store::FileCommit, LibraryError> {
        if let Some(issue) = prepared.codec_issue {
            report.push_issue(issue);
        }
        if prepared.cover_written {
            report.covers_written += 1;
        }
        let commit = self.store.commit_file(&prepared.album, &prepared.track)?;
        if commit.album_created {
            debug!("New album {:?}", prepared.album.title);
            report.albums_created += 1;
        }
        Ok(commit)
    }

    fn remove_track(&self, track: &Track, report: &mut ScanReport) -> Result<(), LibraryError> {
        if self.store.delete_track(&track.id)?.is_some() {
            info!("Removed vanished track {:?}", track.path);
            report.removed += 1;
        }
        Ok(())
    }
}

fn filesystem_issue(path: &Path, err: &io::Error) -> ScanIssue {
    ScanIssue {
        path: path.to_path_buf(),
        kind: IssueKind::Filesystem,
        reason: err.to_string(),
    }
}

/// Milliseconds since the Unix epoch; times before it clamp to zero.
pub fn modified_millis(metadata: &fs::Metadata) -> io::Result<u64> {
    let modified = metadata.modified()?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0);
    Ok(millis)
}
