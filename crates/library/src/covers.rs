use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{cover_id, is_content_id};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageError, Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::error::{CoverError, LibraryError};

pub const DEFAULT_MAX_EDGE: u32 = 768;
const DEFAULT_FILE_NAME: &str = "default.jpg";
const JPEG_QUALITY: u8 = 90;
const PLACEHOLDER_EDGE: u32 = 256;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Turns an embedded picture into the bytes kept in the cache.
pub trait CoverCodec: Send + Sync {
    fn transcode(&self, bytes: &[u8], max_edge: u32) -> Result<Vec<u8>, ImageError>;
}

/// Decode with the `image` crate, shrink to fit `max_edge`, write RGB JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateCodec {
    pub quality: u8,
}

impl Default for ImageCrateCodec {
    fn default() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }
}

impl CoverCodec for ImageCrateCodec {
    fn transcode(&self, bytes: &[u8], max_edge: u32) -> Result<Vec<u8>, ImageError> {
        let decoded = image::load_from_memory(bytes)?;
        let fitted = if decoded.width() > max_edge || decoded.height() > max_edge {
            decoded.resize(max_edge, max_edge, FilterType::Lanczos3)
        } else {
            decoded
        };
        encode_jpeg(&fitted.to_rgb8(), self.quality)
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        encoder.encode_image(image)?;
    }
    Ok(out)
}

fn placeholder_jpeg() -> Result<Vec<u8>, ImageError> {
    let image = RgbImage::from_pixel(PLACEHOLDER_EDGE, PLACEHOLDER_EDGE, Rgb([48, 48, 48]));
    encode_jpeg(&image, JPEG_QUALITY)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCover {
    pub id: String,
    /// False when an entry with this id was already cached.
    pub written: bool,
}

/// Content-addressed cover store laid out as `<root>/<id[..2]>/<id>`, plus
/// `<root>/default.jpg` for tracks without a picture. Entries are never
/// removed.
#[derive(Clone)]
pub struct CoverCache {
    root: PathBuf,
    max_edge: u32,
    codec: Arc<dyn CoverCodec>,
    default_cover: Arc<Vec<u8>>,
}

impl CoverCache {
    pub fn open(
        root: &Path,
        max_edge: u32,
        default_source: Option<&Path>,
        codec: Arc<dyn CoverCodec>,
    ) -> Result<Self, LibraryError> {
        fs::create_dir_all(root)?;
        let max_edge = if max_edge == 0 { DEFAULT_MAX_EDGE } else { max_edge };

        let default_path = root.join(DEFAULT_FILE_NAME);
        if !default_path.is_file() {
            let bytes = match default_source {
                Some(source) => match fs::read(source) {
                    Ok(raw) => match codec.transcode(&raw, max_edge) {
                        Ok(encoded) => encoded,
                        Err(err) => {
                            warn!("Default cover {:?} unusable: {}", source, err);
                            placeholder_jpeg().map_err(CoverError::Codec)?
                        }
                    },
                    Err(err) => {
                        warn!("Failed to read default cover {:?}: {}", source, err);
                        placeholder_jpeg().map_err(CoverError::Codec)?
                    }
                },
                None => placeholder_jpeg().map_err(CoverError::Codec)?,
            };
            write_atomic(&default_path, &bytes)?;
            info!("Created default cover at {:?}", default_path);
        }
        let default_cover = fs::read(&default_path)?;

        Ok(Self {
            root: root.to_path_buf(),
            max_edge,
            codec,
            default_cover: Arc::new(default_cover),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_edge(&self) -> u32 {
        self.max_edge
    }

    /// Caches `bytes` unless an entry for their hash already exists. The file
    /// only becomes visible once completely written.
    pub fn store(&self, bytes: &[u8]) -> Result<StoredCover, CoverError> {
        let id = cover_id(Some(bytes));
        let path = self.shard_path(&id);
        if path.is_file() {
            return Ok(StoredCover { id, written: false });
        }

        let encoded = self.codec.transcode(bytes, self.max_edge)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, &encoded)?;
        debug!("Cached cover {}", id);
        Ok(StoredCover { id, written: true })
    }

    /// Location of a cached entry, or `None` for ids that cannot name one
    /// (the `default` sentinel, malformed input).
    pub fn path_for(&self, cover_id: &str) -> Option<PathBuf> {
        if is_content_id(cover_id) {
            Some(self.shard_path(cover_id))
        } else {
            None
        }
    }

    pub fn default_path(&self) -> PathBuf {
        self.root.join(DEFAULT_FILE_NAME)
    }

    /// The cached file if present, else the default cover.
    pub fn resolve_path(&self, cover_id: &str) -> PathBuf {
        match self.path_for(cover_id) {
            Some(path) if path.is_file() => path,
            _ => self.default_path(),
        }
    }

    pub fn resolve(&self, cover_id: &str) -> Vec<u8> {
        if let Some(path) = self.path_for(cover_id) {
            match fs::read(&path) {
                Ok(bytes) => return bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to read cover {:?}: {}", path, err),
            }
        }
        self.default_cover.as_ref().clone()
    }

    fn shard_path(&self, id: &str) -> PathBuf {
        self.root.join(&id[..2]).join(id)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let written = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path));
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
