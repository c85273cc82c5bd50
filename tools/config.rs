use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{LibraryOptions, DEFAULT_MAX_EDGE};
use lyrics::ParserOptions;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub version: u32,
    pub roots: Vec<String>,
    pub index_path: String,
    pub cache_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cover: Option<String>,
    pub cover_max_edge: u32,
    pub workers: usize,
    pub watch: bool,
    pub watch_debounce_secs: u64,
    pub flush_trailing_lyric: bool,
    pub trim_lyric_line_endings: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            roots: Vec::new(),
            index_path: "library.redb".to_string(),
            cache_dir: "covers".to_string(),
            default_cover: None,
            cover_max_edge: DEFAULT_MAX_EDGE,
            workers: 1,
            watch: false,
            watch_debounce_secs: 2,
            flush_trailing_lyric: false,
            trim_lyric_line_endings: false,
        }
    }
}

impl SyncConfig {
    /// Library options with every path resolved against the config file.
    pub fn library_options(&self, config_path: &Path) -> LibraryOptions {
        let roots = self
            .roots
            .iter()
            .map(|root| root.trim())
            .filter(|root| !root.is_empty())
            .map(|root| resolve_path(config_path, root))
            .collect();
        let mut options = LibraryOptions::new(
            roots,
            resolve_path(config_path, &self.index_path),
            resolve_path(config_path, &self.cache_dir),
        );
        options.default_cover = self
            .default_cover
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| resolve_path(config_path, value));
        options.cover_max_edge = self.cover_max_edge;
        options.workers = self.workers;
        options.lyrics = ParserOptions {
            flush_trailing: self.flush_trailing_lyric,
            trim_line_endings: self.trim_lyric_line_endings,
        };
        options
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("LIBRARY_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(SyncConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: SyncConfig = serde_yaml::from_str(&contents)?;
        repair(&mut config);
        return Ok((config, false));
    }

    let config = SyncConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

fn repair(config: &mut SyncConfig) {
    let defaults = SyncConfig::default();
    if config.version < CONFIG_VERSION {
        config.version = CONFIG_VERSION;
    }
    if config.index_path.trim().is_empty() {
        config.index_path = defaults.index_path;
    }
    if config.cache_dir.trim().is_empty() {
        config.cache_dir = defaults.cache_dir;
    }
    if config.cover_max_edge == 0 {
        config.cover_max_edge = defaults.cover_max_edge;
    }
    if config.workers == 0 {
        config.workers = defaults.workers;
    }
    if config.watch_debounce_secs == 0 {
        config.watch_debounce_secs = defaults.watch_debounce_secs;
    }
}

pub fn save_config(path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::{load_or_create_config, resolve_path, SyncConfig};

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.is_file());
        assert_eq!(config.workers, 1);
        assert!(!config.flush_trailing_lyric);

        let (_, created_again) = load_or_create_config(&path).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn repairs_zero_values_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "roots: [music, /abs/music]\nworkers: 0\ncover_max_edge: 0\nindex_path: ''\nflush_trailing_lyric: true\n",
        )
        .unwrap();

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.workers, 1);
        assert_eq!(config.cover_max_edge, SyncConfig::default().cover_max_edge);
        assert_eq!(config.index_path, "library.redb");

        let options = config.library_options(&path);
        assert_eq!(options.roots[0], dir.path().join("music"));
        assert_eq!(options.roots[1], Path::new("/abs/music"));
        assert!(options.lyrics.flush_trailing);
        assert!(!options.lyrics.trim_line_endings);
        assert!(!config.watch);
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let config = Path::new("/etc/library/config.yaml");
        assert_eq!(
            resolve_path(config, "covers"),
            Path::new("/etc/library/covers")
        );
        assert_eq!(resolve_path(Path::new("config.yaml"), "x"), Path::new("./x"));
    }
}
