use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Root value that stands for the current user's home directory.
pub const HOME_SENTINEL: &str = "$home";

pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "ogg", "opus", "wav", "wma", "aiff", "aif", "alac", "ape", "wv",
];

/// Turns configured roots into directories to walk. Empty entries are dropped
/// and the home sentinel is replaced by `home`.
pub fn resolve_root_dirs(configured: &[String], home: Option<&Path>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for value in configured {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        let root = if trimmed == HOME_SENTINEL {
            match home {
                Some(home) => home.to_path_buf(),
                None => {
                    warn!("Root '{}' configured but no home directory is known", HOME_SENTINEL);
                    continue;
                }
            }
        } else {
            PathBuf::from(trimmed)
        };
        if !roots.contains(&root) {
            roots.push(root);
        }
    }
    roots
}

/// Recursively lists supported audio files under `roots`, sorted and without
/// duplicates. Symlinks are only followed when `follow_links` is set; walkdir
/// then reports loops as errors, which end that branch of the walk.
pub fn scan_roots(roots: &[PathBuf], follow_links: bool) -> Vec<String> {
    let mut files = BTreeSet::new();
    for root in roots {
        if !root.is_dir() {
            warn!("Root directory {:?} is missing or not a directory", root);
            continue;
        }
        for entry in WalkDir::new(root).follow_links(follow_links) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry under {:?}: {}", root, err);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_supported(entry.path()) {
                continue;
            }
            match entry.path().to_str() {
                Some(path) => {
                    files.insert(path.to_string());
                }
                None => warn!("Skipping non UTF-8 path {:?}", entry.path()),
            }
        }
    }
    files.into_iter().collect()
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
