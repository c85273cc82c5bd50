use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{Album, Track};
use lyrics::{ParsedLyrics, ParserOptions};
use metadata::{LoftyReader, TagReader};
use serde::Serialize;
use tracing::info;

pub mod covers;
pub mod error;
pub mod normalize;
pub mod scanner;
pub mod store;
pub mod sync;

pub use covers::{CoverCache, CoverCodec, ImageCrateCodec, StoredCover, DEFAULT_MAX_EDGE};
pub use error::{CoverError, LibraryError};
pub use store::{CatalogStats, CatalogStore, FileCommit};
pub use sync::{IssueKind, ScanIssue, ScanReport};

#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub roots: Vec<PathBuf>,
    pub index_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Source image for `default.jpg`; a neutral placeholder when unset.
    pub default_cover: Option<PathBuf>,
    pub cover_max_edge: u32,
    pub workers: usize,
    pub lyrics: ParserOptions,
}

impl LibraryOptions {
    pub fn new(roots: Vec<PathBuf>, index_path: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            roots,
            index_path,
            cache_dir,
            default_cover: None,
            cover_max_edge: DEFAULT_MAX_EDGE,
            workers: 1,
            lyrics: ParserOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlbumWithTracks {
    pub album: Album,
    pub tracks: Vec<Track>,
}

/// Catalog, cover cache and the collaborators a sync needs.
#[derive(Clone)]
pub struct Library {
    roots: Arc<Vec<PathBuf>>,
    store: CatalogStore,
    covers: CoverCache,
    reader: Arc<dyn TagReader>,
    workers: usize,
    lyric_options: ParserOptions,
}

impl Library {
    pub fn open(options: LibraryOptions) -> Result<Self, LibraryError> {
        Self::open_with(
            options,
            Arc::new(LoftyReader),
            Arc::new(ImageCrateCodec::default()),
        )
    }

    pub fn open_with(
        options: LibraryOptions,
        reader: Arc<dyn TagReader>,
        codec: Arc<dyn CoverCodec>,
    ) -> Result<Self, LibraryError> {
        let store = CatalogStore::open(&options.index_path)?;
        let covers = CoverCache::open(
            &options.cache_dir,
            options.cover_max_edge,
            options.default_cover.as_deref(),
            codec,
        )?;

        let mut roots = Vec::with_capacity(options.roots.len());
        for root in &options.roots {
            roots.push(absolute_root(root)?);
        }
        info!(
            "Library opened with {} root(s), {} worker(s)",
            roots.len(),
            options.workers.max(1)
        );

        Ok(Self {
            roots: Arc::new(roots),
            store,
            covers,
            reader,
            workers: options.workers.max(1),
            lyric_options: options.lyrics,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub fn covers(&self) -> &CoverCache {
        &self.covers
    }

    pub fn list_tracks(&self) -> Result<Vec<Track>, LibraryError> {
        self.store.list_tracks()
    }

    pub fn list_albums(&self) -> Result<Vec<Album>, LibraryError> {
        self.store.list_albums()
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        self.store.get_track(track_id)
    }

    /// Album and its tracks ordered by disc, track number, then title.
    pub fn get_album_with_tracks(
        &self,
        album_id: &str,
    ) -> Result<Option<AlbumWithTracks>, LibraryError> {
        let album = match self.store.get_album(album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };
        let tracks = self.store.album_tracks(album_id)?;
        Ok(Some(AlbumWithTracks { album, tracks }))
    }

    pub fn get_track_path(&self, track_id: &str) -> Result<Option<PathBuf>, LibraryError> {
        Ok(self
            .store
            .get_track(track_id)?
            .map(|track| PathBuf::from(track.path)))
    }

    pub fn resolve_cover(&self, cover_id: &str) -> Vec<u8> {
        self.covers.resolve(cover_id)
    }

    pub fn cover_path(&self, cover_id: &str) -> PathBuf {
        self.covers.resolve_path(cover_id)
    }

    /// Parses the track's sidecar. A missing track or sidecar is `None`.
    pub fn get_lyrics(&self, track_id: &str) -> Result<Option<ParsedLyrics>, LibraryError> {
        let track = match self.store.get_track(track_id)? {
            Some(track) => track,
            None => return Ok(None),
        };
        let sidecar = lyrics::sidecar_path(Path::new(&track.path));
        match lyrics::parse_file(&sidecar, self.lyric_options) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        self.store.stats()
    }
}

fn absolute_root(root: &Path) -> Result<PathBuf, LibraryError> {
    match root.canonicalize() {
        Ok(path) => Ok(path),
        Err(_) if root.is_absolute() => Ok(root.to_path_buf()),
        Err(_) => Ok(env::current_dir()?.join(root)),
    }
}
