use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cover id used when a file carries no embedded picture.
pub const DEFAULT_COVER_ID: &str = "default";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub disc: Option<u16>,
    pub track_number: Option<u16>,
    pub title: String,
    pub artist: String,
    pub artist_id: String,
    pub duration_seconds: f64,
    pub album_title: String,
    pub album_id: String,
    pub path: String,
    /// File mtime in milliseconds since the Unix epoch when the track was last processed.
    pub modified_at: u64,
    pub cover_id: String,
    pub format: String,
    pub bit_depth: Option<u8>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub has_lyrics: bool,
}

/// Albums are keyed by title alone and keep whatever the first track that
/// created them carried; later tracks never rewrite them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub album_artist: String,
    pub artist_id: String,
    pub release_year: Option<i32>,
    pub cover_id: String,
}

pub fn stable_id(input: &str) -> String {
    bytes_id(input.as_bytes())
}

fn bytes_id(input: &[u8]) -> String {
    blake3::hash(input).to_hex().to_string()
}

pub fn track_id(absolute_path: &str) -> String {
    stable_id(absolute_path)
}

pub fn artist_id(artist_name: &str) -> String {
    stable_id(artist_name)
}

pub fn album_id(normalized_title: &str) -> String {
    stable_id(normalized_title)
}

pub fn cover_id(cover: Option<&[u8]>) -> String {
    match cover {
        Some(bytes) => bytes_id(bytes),
        None => DEFAULT_COVER_ID.to_string(),
    }
}

/// True for ids produced by [`stable_id`] and friends: 64 lower-case hex chars.
pub fn is_content_id(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::{album_id, artist_id, cover_id, is_content_id, stable_id, track_id, DEFAULT_COVER_ID};

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("/music/Artist/Album/Track.mp3");
        let second = stable_id("/music/Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("/music/Artist/Album/Track2.mp3"));
    }

    #[test]
    fn track_ids_differ_per_path() {
        let paths = ["/a/1.mp3", "/a/2.mp3", "/b/1.mp3", "/a/1.flac"];
        let ids: Vec<String> = paths.iter().map(|p| track_id(p)).collect();
        for (i, left) in ids.iter().enumerate() {
            for right in &ids[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn empty_inputs_hash_empty_bytes() {
        assert_eq!(artist_id(""), stable_id(""));
        assert_eq!(album_id(""), artist_id(""));
        assert!(is_content_id(&artist_id("")));
    }

    #[test]
    fn cover_id_uses_sentinel_without_bytes() {
        assert_eq!(cover_id(None), DEFAULT_COVER_ID);
        let id = cover_id(Some(b"jpeg bytes"));
        assert_eq!(id, cover_id(Some(b"jpeg bytes")));
        assert!(is_content_id(&id));
        assert!(!is_content_id(DEFAULT_COVER_ID));
    }

    #[test]
    fn rejects_non_hex_ids() {
        assert!(!is_content_id("../../etc/passwd"));
        assert!(!is_content_id(&"A".repeat(64)));
        assert!(is_content_id(&"0a".repeat(32)));
    }
}
