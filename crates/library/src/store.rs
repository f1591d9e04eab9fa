use std::collections::{BTreeMap, HashMap};

use common::{Album, Artist, Track};
use parking_lot::RwLock;
use tracing::info;

use crate::db::{CatalogDb, Record};
use crate::error::LibraryError;

/// Tracks keyed by filepath. Ordered so album lookups always hit the same
/// representative track.
#[derive(Default)]
pub struct TrackStore {
    tracks: RwLock<BTreeMap<String, Track>>,
}

impl TrackStore {
    pub fn load(&self, tracks: Vec<Track>) {
        let mut guard = self.tracks.write();
        guard.clear();
        for track in tracks {
            guard.insert(track.filepath.clone(), track);
        }
    }

    pub fn add(&self, track: Track) {
        self.tracks.write().insert(track.filepath.clone(), track);
    }

    pub fn remove_by_filepaths(&self, filepaths: &[String]) -> usize {
        let mut guard = self.tracks.write();
        filepaths
            .iter()
            .filter(|path| guard.remove(path.as_str()).is_some())
            .count()
    }

    pub fn get(&self, filepath: &str) -> Option<Track> {
        self.tracks.read().get(filepath).cloned()
    }

    pub fn contains(&self, filepath: &str) -> bool {
        self.tracks.read().contains_key(filepath)
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.read().values().cloned().collect()
    }

    /// First track, in filepath order, that belongs to the album.
    pub fn first_for_album(&self, albumhash: &str) -> Option<Track> {
        self.tracks
            .read()
            .values()
            .find(|track| track.albumhash == albumhash)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

/// Hash-keyed store used for albums and artists. `exists` is the dedup gate.
pub struct HashStore<R> {
    items: RwLock<HashMap<String, R>>,
}

impl<R> Default for HashStore<R> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: Record + Clone> HashStore<R> {
    pub fn load(&self, items: Vec<R>) {
        let mut guard = self.items.write();
        guard.clear();
        for item in items {
            guard.insert(item.key().to_string(), item);
        }
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.items.read().contains_key(hash)
    }

    /// Inserts unless the hash is already known. Returns whether it was added.
    pub fn add(&self, item: R) -> bool {
        let mut guard = self.items.write();
        if guard.contains_key(item.key()) {
            return false;
        }
        guard.insert(item.key().to_string(), item);
        true
    }

    pub fn get(&self, hash: &str) -> Option<R> {
        self.items.read().get(hash).cloned()
    }

    pub fn update<F: FnOnce(&mut R)>(&self, hash: &str, update: F) -> bool {
        match self.items.write().get_mut(hash) {
            Some(item) => {
                update(item);
                true
            }
            None => false,
        }
    }

    /// All entries, ordered by hash.
    pub fn snapshot(&self) -> Vec<R> {
        let mut items: Vec<R> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| a.key().cmp(b.key()));
        items
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

pub type AlbumStore = HashStore<Album>;
pub type ArtistStore = HashStore<Artist>;

/// The in-memory working set mirrored to [`CatalogDb`].
#[derive(Default)]
pub struct Catalog {
    pub tracks: TrackStore,
    pub albums: AlbumStore,
    pub artists: ArtistStore,
}

impl Catalog {
    /// Replaces the working set with what is persisted.
    pub fn load(&self, db: &CatalogDb) -> Result<(), LibraryError> {
        let tracks: Vec<Track> = db.get_all()?;
        let albums: Vec<Album> = db.get_all()?;
        let artists: Vec<Artist> = db.get_all()?;
        info!(
            "Loaded catalog: {} tracks, {} albums, {} artists",
            tracks.len(),
            albums.len(),
            artists.len()
        );
        self.tracks.load(tracks);
        self.albums.load(albums);
        self.artists.load(artists);
        Ok(())
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            tracks: self.tracks.len(),
            albums: self.albums.len(),
            artists: self.artists.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CatalogStats {
    pub tracks: usize,
    pub albums: usize,
    pub artists: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_track, temp_db};

    #[test]
    fn album_store_keeps_first_writer() {
        let store = AlbumStore::default();
        let first = Album::from_track(&sample_track("/m/1.mp3", "A", "X", "One"));
        let mut second = first.clone();
        second.year = Some(1999);

        assert!(store.add(first.clone()));
        assert!(!store.add(second));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first.albumhash), Some(first));
    }

    #[test]
    fn first_for_album_follows_path_order() {
        let store = TrackStore::default();
        store.add(sample_track("/m/b.mp3", "A", "X", "Two"));
        store.add(sample_track("/m/a.mp3", "A", "X", "One"));
        store.add(sample_track("/m/c.mp3", "B", "Y", "Three"));

        let albumhash = store.get("/m/a.mp3").unwrap().albumhash;
        let first = store.first_for_album(&albumhash).unwrap();
        assert_eq!(first.filepath, "/m/a.mp3");
        assert!(store.first_for_album("nope").is_none());
    }

    #[test]
    fn remove_by_filepaths_counts_hits() {
        let store = TrackStore::default();
        store.add(sample_track("/m/a.mp3", "A", "X", "One"));
        store.add(sample_track("/m/b.mp3", "A", "X", "Two"));
        let removed = store.remove_by_filepaths(&["/m/a.mp3".to_string(), "/m/x.mp3".to_string()]);
        assert_eq!(removed, 1);
        assert!(!store.contains("/m/a.mp3"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn catalog_load_mirrors_db() {
        let (_dir, db) = temp_db();
        let track = sample_track("/m/a.mp3", "A", "X", "One");
        db.commit_batch(
            &[track.clone()],
            &[Album::from_track(&track)],
            &[Artist::new("X")],
        )
        .unwrap();

        let catalog = Catalog::default();
        catalog.tracks.add(sample_track("/m/stale.mp3", "S", "S", "S"));
        catalog.load(&db).unwrap();

        assert_eq!(
            catalog.stats(),
            CatalogStats {
                tracks: 1,
                albums: 1,
                artists: 1
            }
        );
        assert!(catalog.tracks.contains("/m/a.mp3"));
    }
}
