use std::path::Path;

use lofty::error::{ErrorKind, LoftyError};
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};

#[derive(Debug, Default, Clone)]
pub struct TagSet {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_seconds: f64,
    pub bit_depth: Option<u8>,
    pub sample_rate: Option<u32>,
    pub bitrate: Option<u32>,
    pub cover: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(value) => write!(f, "unsupported file: {}", value),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads tags, stream properties and the embedded cover of one media file.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagSet, MetadataError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyReader;

impl TagReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<TagSet, MetadataError> {
        read_tags(path)
    }
}

pub fn read_tags(path: &Path) -> Result<TagSet, MetadataError> {
    let tagged_file = lofty::read_from_path(path).map_err(|err| {
        if matches!(err.kind(), ErrorKind::UnknownFormat) {
            MetadataError::Unsupported(path.display().to_string())
        } else {
            MetadataError::Lofty(err)
        }
    })?;
    let properties = tagged_file.properties();

    let mut info = TagSet {
        duration_seconds: properties.duration().as_secs_f64(),
        bit_depth: properties.bit_depth(),
        sample_rate: properties.sample_rate(),
        bitrate: properties.audio_bitrate().or(properties.overall_bitrate()),
        ..TagSet::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = non_empty(tag.get_string(&ItemKey::TrackTitle));
        info.album = non_empty(tag.get_string(&ItemKey::AlbumTitle));
        info.artist = non_empty(tag.get_string(&ItemKey::TrackArtist));
        info.album_artist = non_empty(tag.get_string(&ItemKey::AlbumArtist));
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.disc_no = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
        info.cover = pick_picture(tag.pictures()).map(|picture| picture.data().to_vec());
    }

    Ok(info)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Leading number of values such as `3/12`.
pub fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

/// First run of four digits, so `2004-05-01` and `2004` both yield 2004.
pub fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{parse_u16, parse_year, LoftyReader, MetadataError, TagReader};

    #[test]
    fn parses_track_numbers() {
        assert_eq!(parse_u16("3"), Some(3));
        assert_eq!(parse_u16(" 7/12 "), Some(7));
        assert_eq!(parse_u16("side A"), None);
    }

    #[test]
    fn parses_years() {
        assert_eq!(parse_year("1999"), Some(1999));
        assert_eq!(parse_year("2004-05-01"), Some(2004));
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"definitely not audio").unwrap();
        let err = LoftyReader.read(file.path()).unwrap_err();
        assert!(matches!(err, MetadataError::Unsupported(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoftyReader.read(&dir.path().join("gone.mp3")).unwrap_err();
        assert!(matches!(err, MetadataError::Lofty(_) | MetadataError::Io(_)));
    }
}
