use std::path::Path;

use common::{album_id, artist_id, path_key, track_id, Album, Track};
use metadata::TagSet;

use crate::scanner::audio_format;

const UNKNOWN_ALBUM: &str = "Unknown Album";

#[derive(Debug, Clone)]
pub struct Normalized {
    pub track: Track,
    pub album: Album,
}

/// Everything about a file that does not come from its tags.
#[derive(Debug, Clone)]
pub struct FileFacts<'a> {
    pub path: &'a Path,
    pub modified_at: u64,
    pub cover_id: String,
    pub has_lyrics: bool,
}

/// Fills tag gaps from the file system and derives every id.
pub fn normalize(tags: &TagSet, facts: FileFacts<'_>) -> Normalized {
    let path = facts.path;
    let album_dir = album_dir(path);
    let (folder_title, folder_year) = album_dir
        .and_then(|dir| dir.file_name())
        .map(|name| split_title_year(&name.to_string_lossy()))
        .unwrap_or_else(|| (String::new(), None));

    let album_title = tags
        .album
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| Some(folder_title).filter(|v| !v.is_empty()))
        .unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

    let artist = tags.artist.clone().unwrap_or_default();
    let album_artist = tags
        .album_artist
        .clone()
        .unwrap_or_else(|| artist.clone());

    let title = tags.title.clone().unwrap_or_else(|| file_name(path));
    let disc = tags.disc_no.or_else(|| disc_number_from_path(path));
    let path_string = path_key(path);

    let album = Album {
        id: album_id(&album_title),
        title: album_title.clone(),
        artist_id: artist_id(&album_artist),
        album_artist,
        release_year: tags.year.or(folder_year),
        cover_id: facts.cover_id.clone(),
    };

    let track = Track {
        id: track_id(&path_string),
        disc,
        track_number: tags.track_no,
        title,
        artist_id: artist_id(&artist),
        artist,
        duration_seconds: tags.duration_seconds,
        album_title,
        album_id: album.id.clone(),
        path: path_string,
        modified_at: facts.modified_at,
        cover_id: facts.cover_id,
        format: audio_format(path),
        bit_depth: tags.bit_depth,
        bitrate: tags.bitrate,
        sample_rate: tags.sample_rate,
        has_lyrics: facts.has_lyrics,
    };

    Normalized { track, album }
}

/// Full file name, extension included.
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}

/// Directory naming the album: the parent, or the grandparent when the
/// parent is a disc folder such as `CD 2`.
fn album_dir(path: &Path) -> Option<&Path> {
    let parent = path.parent()?;
    let is_disc = parent
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| parse_disc_number(name).is_some())
        .unwrap_or(false);
    if is_disc {
        parent.parent().or(Some(parent))
    } else {
        Some(parent)
    }
}

fn disc_number_from_path(path: &Path) -> Option<u16> {
    let name = path.parent()?.file_name()?.to_str()?;
    parse_disc_number(name)
}

/// `Title (1999)` and `Title [1999]` split into title and year.
fn split_title_year(input: &str) -> (String, Option<i32>) {
    let trimmed = input.trim();
    if let Some((title, year)) = split_year_suffix(trimmed, '(', ')') {
        return (title.to_string(), Some(year));
    }
    if let Some((title, year)) = split_year_suffix(trimmed, '[', ']') {
        return (title.to_string(), Some(year));
    }
    (trimmed.to_string(), None)
}

fn split_year_suffix(input: &str, open: char, close: char) -> Option<(&str, i32)> {
    let trimmed = input.trim_end();
    if !trimmed.ends_with(close) {
        return None;
    }
    let open_idx = trimmed.rfind(open)?;
    let year_str = trimmed
        .get(open_idx + open.len_utf8()..trimmed.len() - close.len_utf8())?
        .trim();
    if year_str.len() != 4 || !year_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year = year_str.parse::<i32>().ok()?;
    let title = trimmed[..open_idx].trim_end();
    if title.is_empty() {
        return None;
    }
    Some((title, year))
}

const DISC_KEYWORDS: &[&str] = &["cd", "disc", "disk", "vol", "volume", "part", "side", "lp"];

fn parse_disc_number(name: &str) -> Option<u16> {
    let cleaned: String = name
        .chars()
        .map(|ch| match ch.to_ascii_lowercase() {
            '_' | '-' | '.' => ' ',
            other => other,
        })
        .collect();
    let cleaned = cleaned.trim();

    for prefix in DISC_KEYWORDS {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                return rest.parse().ok();
            }
        }
    }
    None
}
