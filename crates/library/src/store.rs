use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{Album, Track};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LibraryError;

const CATALOG_VERSION: u32 = 1;
const KEY_SEP: char = '\x1f';

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const TRACKS_BY_PATH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_path");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const ALBUM_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_tracks");

const DATA_TABLES: [TableDefinition<&str, &[u8]>; 4] = [
    TRACKS_TABLE,
    TRACKS_BY_PATH_TABLE,
    ALBUMS_TABLE,
    ALBUM_TRACKS_TABLE,
];

const META_VERSION_KEY: &str = "version";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub tracks: u64,
    pub albums: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileCommit {
    pub album_created: bool,
    pub track_created: bool,
}

/// Persistent Track/Album catalog. Tracks are also indexed by path and by
/// album; both indexes are maintained inside the same write transaction as
/// the track row.
#[derive(Clone)]
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;

        match store.read_version()? {
            Some(version) if version == CATALOG_VERSION => {
                info!("Loaded catalog from {:?}", path);
            }
            Some(version) => {
                warn!(
                    "Catalog version mismatch ({} != {}); clearing, next sync rebuilds it",
                    version, CATALOG_VERSION
                );
                store.clear()?;
            }
            None => {
                info!("Created catalog at {:?}", path);
                store.write_version()?;
            }
        }

        Ok(store)
    }

    fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        write_txn.open_table(META_TABLE)?;
        for table in DATA_TABLES {
            write_txn.open_table(table)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_version(&self) -> Result<Option<u32>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        let version = match table.get(META_VERSION_KEY)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(version)
    }

    fn write_version(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&CATALOG_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Drops every track and album. Cover cache files are untouched.
    pub fn clear(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        for table in DATA_TABLES {
            clear_table(&write_txn, table)?;
            write_txn.open_table(table)?;
        }
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&CATALOG_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let track = match track_table.get(track_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn get_track_by_path(&self, path: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let path_table = read_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;

        let track_id = match path_table.get(path)? {
            Some(value) => id_from_bytes(value.value())?,
            None => return Ok(None),
        };
        let track = match track_table.get(track_id.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn has_path(&self, path: &str) -> Result<bool, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let path_table = read_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let found = path_table.get(path)?.is_some();
        Ok(found)
    }

    /// Inserts or fully replaces the row for `track.id`. Returns true when the
    /// id was not present before.
    pub fn upsert_track(&self, track: &Track) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let created = put_track(&write_txn, track)?;
        write_txn.commit()?;
        Ok(created)
    }

    pub fn delete_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut path_table = write_txn.open_table(TRACKS_BY_PATH_TABLE)?;
            let mut album_track_table = write_txn.open_table(ALBUM_TRACKS_TABLE)?;

            let removed: Option<Track> = match track_table.remove(track_id)? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            if let Some(track) = &removed {
                path_table.remove(track.path.as_str())?;
                let key = album_track_key(&track.album_id, &track.id);
                album_track_table.remove(key.as_str())?;
            }
            removed
        };
        if removed.is_some() {
            write_txn.commit()?;
        }
        Ok(removed)
    }

    /// Rewrites only `has_lyrics`. Returns true when the stored value changed.
    pub fn set_has_lyrics(&self, track_id: &str, has_lyrics: bool) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut track_table = write_txn.open_table(TRACKS_TABLE)?;
            let mut track: Track = match track_table.get(track_id)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            if track.has_lyrics == has_lyrics {
                false
            } else {
                track.has_lyrics = has_lyrics;
                let track_bytes = encode_value(&track)?;
                track_table.insert(track_id, track_bytes.as_slice())?;
                true
            }
        };
        if updated {
            write_txn.commit()?;
        }
        Ok(updated)
    }

    pub fn list_tracks(&self) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks = Vec::new();
        for entry in track_table.iter()? {
            let entry = entry?;
            tracks.push(decode_value(entry.1.value())?);
        }
        Ok(tracks)
    }

    pub fn get_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        let album = match album_table.get(album_id)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(album)
    }

    pub fn upsert_album(&self, album: &Album) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let created = {
            let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
            let album_bytes = encode_value(album)?;
            let prev = album_table.insert(album.id.as_str(), album_bytes.as_slice())?;
            prev.is_none()
        };
        write_txn.commit()?;
        Ok(created)
    }

    /// First writer wins: an existing album row is left as it is.
    pub fn insert_album_if_absent(&self, album: &Album) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let created = put_album_if_absent(&write_txn, album)?;
        if created {
            write_txn.commit()?;
        }
        Ok(created)
    }

    pub fn delete_album(&self, album_id: &str) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut album_table = write_txn.open_table(ALBUMS_TABLE)?;
            let prev = album_table.remove(album_id)?;
            prev.is_some()
        };
        if removed {
            write_txn.commit()?;
        }
        Ok(removed)
    }

    pub fn list_albums(&self) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        let mut albums = Vec::new();
        for entry in album_table.iter()? {
            let entry = entry?;
            albums.push(decode_value(entry.1.value())?);
        }
        Ok(albums)
    }

    /// Tracks of one album ordered by disc, track number, title, path.
    pub fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let album_track_table = read_txn.open_table(ALBUM_TRACKS_TABLE)?;

        let prefix = prefix_key(album_id);
        let mut end = prefix.clone();
        end.push('\u{10ffff}');
        let mut tracks: Vec<Track> = Vec::new();

        for entry in album_track_table.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            let key = entry.0.value();
            let (_, track_id) = split_key_last(key)?;
            if let Some(value) = track_table.get(track_id)? {
                tracks.push(decode_value(value.value())?);
            }
        }

        tracks.sort_by(|a, b| {
            let disc_a = a.disc.unwrap_or(u16::MAX);
            let disc_b = b.disc.unwrap_or(u16::MAX);
            let track_a = a.track_number.unwrap_or(u16::MAX);
            let track_b = b.track_number.unwrap_or(u16::MAX);
            disc_a
                .cmp(&disc_b)
                .then_with(|| track_a.cmp(&track_b))
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(tracks)
    }

    /// Album insert-if-absent plus track upsert, committed together.
    pub fn commit_file(&self, album: &Album, track: &Track) -> Result<FileCommit, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let album_created = put_album_if_absent(&write_txn, album)?;
        let track_created = put_track(&write_txn, track)?;
        write_txn.commit()?;
        Ok(FileCommit {
            album_created,
            track_created,
        })
    }

    pub fn stats(&self) -> Result<CatalogStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        Ok(CatalogStats {
            tracks: track_table.len()?,
            albums: album_table.len()?,
        })
    }
}

fn put_track(txn: &WriteTransaction, track: &Track) -> Result<bool, LibraryError> {
    let mut track_table = txn.open_table(TRACKS_TABLE)?;
    let mut path_table = txn.open_table(TRACKS_BY_PATH_TABLE)?;
    let mut album_track_table = txn.open_table(ALBUM_TRACKS_TABLE)?;

    let previous: Option<Track> = match track_table.get(track.id.as_str())? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    if let Some(prev) = &previous {
        if prev.path != track.path {
            path_table.remove(prev.path.as_str())?;
        }
        if prev.album_id != track.album_id {
            let key = album_track_key(&prev.album_id, &prev.id);
            album_track_table.remove(key.as_str())?;
        }
    }

    let track_bytes = encode_value(track)?;
    track_table.insert(track.id.as_str(), track_bytes.as_slice())?;
    path_table.insert(track.path.as_str(), track.id.as_bytes())?;
    let key = album_track_key(&track.album_id, &track.id);
    album_track_table.insert(key.as_str(), track.id.as_bytes())?;

    Ok(previous.is_none())
}

fn put_album_if_absent(txn: &WriteTransaction, album: &Album) -> Result<bool, LibraryError> {
    let mut album_table = txn.open_table(ALBUMS_TABLE)?;
    if album_table.get(album.id.as_str())?.is_some() {
        return Ok(false);
    }
    let album_bytes = encode_value(album)?;
    album_table.insert(album.id.as_str(), album_bytes.as_slice())?;
    Ok(true)
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn id_from_bytes(bytes: &[u8]) -> Result<String, LibraryError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| LibraryError::KeyParse(String::from_utf8_lossy(bytes).to_string()))
}

fn album_track_key(album_id: &str, track_id: &str) -> String {
    let mut out = prefix_key(album_id);
    out.push_str(track_id);
    out
}

fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

#[cfg(test)]
mod tests {
    use common::{Album, Track};
    use tempfile::TempDir;

    use super::CatalogStore;

    fn open_store() -> (TempDir, CatalogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogStore::open(&dir.path().join("catalog.redb")).unwrap();
        (dir, store)
    }

    fn track(id: &str, path: &str, album_id: &str, number: u16) -> Track {
        Track {
            id: id.to_string(),
            disc: Some(1),
            track_number: Some(number),
            title: format!("Track {}", number),
            artist: "Artist".to_string(),
            artist_id: common::artist_id("Artist"),
            duration_seconds: 180.0,
            album_title: "Album".to_string(),
            album_id: album_id.to_string(),
            path: path.to_string(),
            modified_at: 1,
            cover_id: common::DEFAULT_COVER_ID.to_string(),
            format: "MP3".to_string(),
            bit_depth: None,
            bitrate: Some(320),
            sample_rate: Some(44_100),
            has_lyrics: false,
        }
    }

    fn album(id: &str, year: Option<i32>) -> Album {
        Album {
            id: id.to_string(),
            title: "Album".to_string(),
            album_artist: "Artist".to_string(),
            artist_id: common::artist_id("Artist"),
            release_year: year,
            cover_id: common::DEFAULT_COVER_ID.to_string(),
        }
    }

    #[test]
    fn upsert_and_lookup_by_id_and_path() {
        let (_dir, store) = open_store();
        let t = track("t1", "/m/a.mp3", "al", 1);
        assert!(store.upsert_track(&t).unwrap());
        assert!(!store.upsert_track(&t).unwrap());

        assert_eq!(store.get_track("t1").unwrap(), Some(t.clone()));
        assert_eq!(store.get_track_by_path("/m/a.mp3").unwrap(), Some(t));
        assert!(store.get_track_by_path("/m/b.mp3").unwrap().is_none());
        assert_eq!(store.stats().unwrap().tracks, 1);
    }

    #[test]
    fn upsert_replaces_indexes() {
        let (_dir, store) = open_store();
        store.upsert_track(&track("t1", "/m/a.mp3", "old", 1)).unwrap();
        store.upsert_track(&track("t1", "/m/b.mp3", "new", 1)).unwrap();

        assert!(!store.has_path("/m/a.mp3").unwrap());
        assert!(store.has_path("/m/b.mp3").unwrap());
        assert!(store.album_tracks("old").unwrap().is_empty());
        assert_eq!(store.album_tracks("new").unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_row_and_indexes() {
        let (_dir, store) = open_store();
        store.upsert_track(&track("t1", "/m/a.mp3", "al", 1)).unwrap();
        store.upsert_track(&track("t2", "/m/b.mp3", "al", 2)).unwrap();

        let removed = store.delete_track("t1").unwrap();
        assert_eq!(removed.map(|t| t.id), Some("t1".to_string()));
        assert!(store.delete_track("t1").unwrap().is_none());
        assert!(!store.has_path("/m/a.mp3").unwrap());
        let remaining: Vec<String> = store
            .album_tracks("al")
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(remaining, vec!["t2".to_string()]);
    }

    #[test]
    fn album_tracks_are_ordered() {
        let (_dir, store) = open_store();
        store.upsert_track(&track("z", "/m/3.mp3", "al", 3)).unwrap();
        store.upsert_track(&track("y", "/m/1.mp3", "al", 1)).unwrap();
        let mut second_disc = track("x", "/m/d2.mp3", "al", 1);
        second_disc.disc = Some(2);
        store.upsert_track(&second_disc).unwrap();

        let order: Vec<String> = store
            .album_tracks("al")
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec!["y", "z", "x"]);
    }

    #[test]
    fn album_insert_keeps_first_writer() {
        let (_dir, store) = open_store();
        assert!(store.insert_album_if_absent(&album("al", Some(1999))).unwrap());
        assert!(!store.insert_album_if_absent(&album("al", Some(2005))).unwrap());
        assert_eq!(store.get_album("al").unwrap().unwrap().release_year, Some(1999));

        let commit = store
            .commit_file(&album("al", Some(2010)), &track("t", "/m/t.mp3", "al", 1))
            .unwrap();
        assert!(!commit.album_created);
        assert!(commit.track_created);
        assert_eq!(store.get_album("al").unwrap().unwrap().release_year, Some(1999));

        assert!(!store.upsert_album(&album("al", Some(2020))).unwrap());
        assert_eq!(store.get_album("al").unwrap().unwrap().release_year, Some(2020));
        assert!(store.delete_album("al").unwrap());
        assert!(store.list_albums().unwrap().is_empty());
    }

    #[test]
    fn lyrics_flag_updates_alone() {
        let (_dir, store) = open_store();
        let t = track("t1", "/m/a.mp3", "al", 1);
        store.upsert_track(&t).unwrap();

        assert!(store.set_has_lyrics("t1", true).unwrap());
        assert!(!store.set_has_lyrics("t1", true).unwrap());
        assert!(!store.set_has_lyrics("missing", true).unwrap());

        let stored = store.get_track("t1").unwrap().unwrap();
        assert!(stored.has_lyrics);
        assert_eq!(Track { has_lyrics: false, ..stored }, t);
    }

    #[test]
    fn open_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/catalog.redb");
        let store = CatalogStore::open(&path).unwrap();
        assert!(path.is_file());
        assert_eq!(store.stats().unwrap().tracks, 0);
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.redb");
        {
            let store = CatalogStore::open(&path).unwrap();
            store.upsert_track(&track("t1", "/m/a.mp3", "al", 1)).unwrap();
        }
        let store = CatalogStore::open(&path).unwrap();
        assert_eq!(store.list_tracks().unwrap().len(), 1);

        store.clear().unwrap();
        assert!(store.list_tracks().unwrap().is_empty());
        assert!(!store.has_path("/m/a.mp3").unwrap());
    }
}
