use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use library::IndexerOptions;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub version: u32,
    /// Music folders; `$home` stands for the user's home directory.
    pub root_dirs: Vec<String>,
    pub index_path: String,
    pub data_path: String,
    pub follow_symlinks: bool,
    pub artist_separators: Vec<String>,
    pub thumbnail_workers: usize,
    pub thumbnail_max_edge: u32,
    pub palette_size: usize,
    pub scan_interval_secs: u64,
    pub watch_music: bool,
    pub watch_debounce_secs: u64,
    pub connectivity_url: String,
    pub connectivity_timeout_secs: u64,
    pub artist_image_timeout_secs: u64,
    pub artist_image_retry_secs: u64,
    pub user_agent: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            root_dirs: Vec::new(),
            index_path: "catalog.redb".to_string(),
            data_path: "data".to_string(),
            follow_symlinks: false,
            artist_separators: vec![";".to_string(), "/".to_string()],
            thumbnail_workers: 4,
            thumbnail_max_edge: 512,
            palette_size: 5,
            scan_interval_secs: 600,
            watch_music: true,
            watch_debounce_secs: 2,
            connectivity_url: "https://api.deezer.com".to_string(),
            connectivity_timeout_secs: 5,
            artist_image_timeout_secs: 10,
            artist_image_retry_secs: 60 * 60 * 24,
            user_agent: "catalog-indexer/0.1".to_string(),
        }
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
    match env::var("CATALOG_CONFIG") {
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

/// Reads the config at `path`, writing the defaults there first when it does
/// not exist. The flag is `true` when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(IndexerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: IndexerConfig = serde_yaml::from_str(&contents)?;
        normalize(&mut config);
        return Ok((config, false));
    }

    let config = IndexerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

fn normalize(config: &mut IndexerConfig) {
    let defaults = IndexerConfig::default();
    if config.version < CONFIG_VERSION {
        config.version = CONFIG_VERSION;
    }
    if config.index_path.trim().is_empty() {
        config.index_path = defaults.index_path;
    }
    if config.data_path.trim().is_empty() {
        config.data_path = defaults.data_path;
    }
    config.artist_separators.retain(|s| !s.is_empty());
    if config.artist_separators.is_empty() {
        config.artist_separators = defaults.artist_separators;
    }
    if config.thumbnail_workers == 0 {
        config.thumbnail_workers = defaults.thumbnail_workers;
    }
    if config.thumbnail_max_edge == 0 {
        config.thumbnail_max_edge = defaults.thumbnail_max_edge;
    }
    if config.palette_size == 0 {
        config.palette_size = defaults.palette_size;
    }
    if config.scan_interval_secs == 0 {
        config.scan_interval_secs = defaults.scan_interval_secs;
    }
    if config.watch_debounce_secs == 0 {
        config.watch_debounce_secs = defaults.watch_debounce_secs;
    }
    if config.connectivity_timeout_secs == 0 {
        config.connectivity_timeout_secs = defaults.connectivity_timeout_secs;
    }
    if config.artist_image_timeout_secs == 0 {
        config.artist_image_timeout_secs = defaults.artist_image_timeout_secs;
    }
}

pub fn save_config(path: &Path, config: &IndexerConfig) -> Result<(), ConfigError> {
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

/// Pipeline options with every relative path resolved against the config file.
pub fn indexer_options(config_path: &Path, config: &IndexerConfig) -> IndexerOptions {
    let root_dirs = config
        .root_dirs
        .iter()
        .map(|root| {
            let trimmed = root.trim();
            if trimmed.is_empty() || trimmed == library::HOME_SENTINEL {
                trimmed.to_string()
            } else {
                resolve_path(config_path, trimmed).to_string_lossy().to_string()
            }
        })
        .collect();

    IndexerOptions {
        root_dirs,
        home_dir: dirs::home_dir(),
        follow_symlinks: config.follow_symlinks,
        artist_separators: config.artist_separators.clone(),
        thumbnail_workers: config.thumbnail_workers,
        thumbnail_max_edge: config.thumbnail_max_edge,
        palette_size: config.palette_size,
        scan_interval: Duration::from_secs(config.scan_interval_secs),
        artist_image_retry: Duration::from_secs(config.artist_image_retry_secs),
        ..IndexerOptions::default()
    }
    .with_data_dir(&resolve_path(config_path, &config.data_path))
}
