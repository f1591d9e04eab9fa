use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use common::Track;

/// How the catalog differs from what is on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// Tracks whose file can no longer be read.
    pub removed: Vec<String>,
    /// Tracks whose file mtime differs from the recorded one.
    pub modified: Vec<String>,
    /// Files on disk without a catalog entry once stale entries are dropped.
    pub untagged: Vec<String>,
}

impl ChangeSet {
    /// Every filepath that must leave the track stores.
    pub fn stale(&self) -> Vec<String> {
        let mut stale = Vec::with_capacity(self.removed.len() + self.modified.len());
        stale.extend(self.removed.iter().cloned());
        stale.extend(self.modified.iter().cloned());
        stale
    }
}

/// File mtime in nanoseconds since the unix epoch, or `None` when the file
/// cannot be read.
pub fn file_mtime(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
    Some(nanos.min(u128::from(u64::MAX)) as u64)
}

pub fn detect_changes(tracks: &[Track], disk_files: &[String]) -> ChangeSet {
    detect_changes_with(tracks, disk_files, |path| file_mtime(Path::new(path)))
}

/// Same as [`detect_changes`] with a pluggable mtime lookup.
pub fn detect_changes_with<F>(tracks: &[Track], disk_files: &[String], mtime: F) -> ChangeSet
where
    F: Fn(&str) -> Option<u64>,
{
    let mut changes = ChangeSet::default();
    let mut tagged: HashSet<&str> = HashSet::with_capacity(tracks.len());

    for track in tracks {
        match mtime(&track.filepath) {
            None => changes.removed.push(track.filepath.clone()),
            Some(current) if current != track.last_modified => {
                changes.modified.push(track.filepath.clone())
            }
            Some(_) => {
                tagged.insert(track.filepath.as_str());
            }
        }
    }

    let mut untagged: Vec<String> = disk_files
        .iter()
        .filter(|path| !tagged.contains(path.as_str()))
        .cloned()
        .collect();
    untagged.sort();
    untagged.dedup();
    changes.untagged = untagged;

    changes.removed.sort();
    changes.modified.sort();
    changes
}
