use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::Track;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::changes::detect_changes;
use crate::colors::{process_album_colors, process_artist_colors, ColorReport};
use crate::db::CatalogDb;
use crate::enrichment::{
    download_missing_artist_images, ArtistImageSource, ConnectivityProbe, EnrichmentReport,
    NoArtistImages, Offline,
};
use crate::error::IngestError;
use crate::scanner::{resolve_root_dirs, scan_roots};
use crate::session::{SessionKey, SessionManager};
use crate::store::{Catalog, CatalogStats};
use crate::tagging::{tag_untagged, LoftyExtractor, TagExtractor, TagReport};
use crate::thumbnails::{extract_album_thumbnails, ThumbnailReport};

#[derive(Clone, Debug)]
pub struct IndexerOptions {
    /// Directories to index. `$home` stands for `home_dir`.
    pub root_dirs: Vec<String>,
    pub home_dir: Option<PathBuf>,
    pub follow_symlinks: bool,
    pub artist_separators: Vec<String>,
    pub thumbnails_dir: PathBuf,
    pub artist_images_dir: PathBuf,
    pub thumbnail_workers: usize,
    pub thumbnail_max_edge: u32,
    pub palette_size: usize,
    /// Time between scheduled runs; also how long enrichment waits after a
    /// failed connectivity probe.
    pub scan_interval: Duration,
    pub artist_image_retry: Duration,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            root_dirs: Vec::new(),
            home_dir: dirs::home_dir(),
            follow_symlinks: false,
            artist_separators: vec![";".to_string(), "/".to_string()],
            thumbnails_dir: PathBuf::from("images/thumbnails"),
            artist_images_dir: PathBuf::from("images/artists"),
            thumbnail_workers: 4,
            thumbnail_max_edge: 512,
            palette_size: 5,
            scan_interval: Duration::from_secs(600),
            artist_image_retry: Duration::from_secs(60 * 60 * 24),
        }
    }
}

impl IndexerOptions {
    /// Places thumbnails and artist images under `data_dir/images`.
    pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
        let images = data_dir.join("images");
        self.thumbnails_dir = images.join("thumbnails");
        self.artist_images_dir = images.join("artists");
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    pub session: SessionKey,
    /// Set when no root directory was configured and nothing ran.
    pub skipped: bool,
    pub scanned: usize,
    pub removed: usize,
    pub modified: usize,
    pub untagged: usize,
    pub tagging: TagReport,
    pub thumbnails: ThumbnailReport,
    pub album_colors: ColorReport,
    pub artist_colors: ColorReport,
    /// `None` when the connectivity probe failed.
    pub enrichment: Option<EnrichmentReport>,
    pub artist_colors_after_enrichment: Option<ColorReport>,
    pub catalog: CatalogStats,
}

impl IngestReport {
    fn empty(session: SessionKey) -> Self {
        Self {
            session,
            skipped: false,
            scanned: 0,
            removed: 0,
            modified: 0,
            untagged: 0,
            tagging: TagReport::default(),
            thumbnails: ThumbnailReport::default(),
            album_colors: ColorReport::default(),
            artist_colors: ColorReport::default(),
            enrichment: None,
            artist_colors_after_enrichment: None,
            catalog: CatalogStats::default(),
        }
    }
}

/// Runs ingestion sessions against one catalog. Shared through `Arc`; starting a
/// session from another thread cancels the tag stage of the running one.
pub struct Indexer {
    db: CatalogDb,
    catalog: Catalog,
    sessions: SessionManager,
    /// Held from the catalog reload until the tag stage ends, so only one
    /// session at a time writes new entries to the stores.
    tagging: Mutex<()>,
    extractor: Arc<dyn TagExtractor>,
    probe: Arc<dyn ConnectivityProbe>,
    images: Arc<dyn ArtistImageSource>,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(db: CatalogDb, options: IndexerOptions) -> Self {
        Self {
            db,
            catalog: Catalog::default(),
            sessions: SessionManager::new(),
            tagging: Mutex::new(()),
            extractor: Arc::new(LoftyExtractor),
            probe: Arc::new(Offline),
            images: Arc::new(NoArtistImages),
            options,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TagExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_image_source(mut self, images: Arc<dyn ArtistImageSource>) -> Self {
        self.images = images;
        self
    }

    pub fn db(&self) -> &CatalogDb {
        &self.db
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn options(&self) -> &IndexerOptions {
        &self.options
    }

    /// Fresh key for [`Indexer::start_ingestion`].
    pub fn next_key(&self) -> SessionKey {
        self.sessions.next_key()
    }

    /// One full run: scan, drop stale tracks, tag new files, then album
    /// images, colors and artist images.
    pub fn start_ingestion(&self, key: SessionKey) -> Result<IngestReport, IngestError> {
        let session = self.sessions.begin(key);
        let options = &self.options;
        let mut report = IngestReport::empty(key);

        let roots = resolve_root_dirs(&options.root_dirs, options.home_dir.as_deref());
        if roots.is_empty() {
            warn!("No root directories configured. Add music folders to root_dirs to index them.");
            report.skipped = true;
            report.catalog = self.catalog.stats();
            return Ok(report);
        }
        info!("Session {}: scanning {} root directories", key, roots.len());

        let guard = self.tagging.lock();
        self.catalog.load(&self.db)?;
        let files = scan_roots(&roots, options.follow_symlinks);
        report.scanned = files.len();

        let changes = detect_changes(&self.catalog.tracks.snapshot(), &files);
        report.removed = changes.removed.len();
        report.modified = changes.modified.len();
        report.untagged = changes.untagged.len();

        let stale = changes.stale();
        if !stale.is_empty() {
            self.catalog.tracks.remove_by_filepaths(&stale);
            self.db.delete_by_keys::<Track>(&stale)?;
            info!(
                "Removed {} missing and {} modified tracks",
                report.removed, report.modified
            );
        }

        let favorites = self.db.favorite_track_hashes()?;
        report.tagging = match tag_untagged(
            &self.catalog,
            &self.db,
            self.extractor.as_ref(),
            &session,
            &changes.untagged,
            &favorites,
            &options.artist_separators,
        ) {
            Ok(tagging) => tagging,
            Err(IngestError::Cancelled) => {
                info!("Session {} superseded by session {}", key, self.sessions.current());
                // Drop what this session added but never committed.
                self.catalog.load(&self.db)?;
                return Err(IngestError::Cancelled);
            }
            Err(err) => return Err(err),
        };
        drop(guard);

        report.thumbnails = extract_album_thumbnails(
            &self.catalog,
            &self.db,
            self.extractor.as_ref(),
            &options.thumbnails_dir,
            options.thumbnail_workers,
            options.thumbnail_max_edge,
        )?;
        report.album_colors = process_album_colors(
            &self.catalog,
            &self.db,
            &options.thumbnails_dir,
            options.palette_size,
        )?;
        report.artist_colors = process_artist_colors(
            &self.catalog,
            &self.db,
            &options.artist_images_dir,
            options.palette_size,
        )?;

        if self.probe.reachable() {
            let enrichment = download_missing_artist_images(
                &self.catalog,
                &self.db,
                self.images.as_ref(),
                &options.artist_images_dir,
                options.artist_image_retry,
                options.thumbnail_max_edge,
            )?;
            if !enrichment.aborted && enrichment.downloaded > 0 {
                report.artist_colors_after_enrichment = Some(process_artist_colors(
                    &self.catalog,
                    &self.db,
                    &options.artist_images_dir,
                    options.palette_size,
                )?);
            }
            report.enrichment = Some(enrichment);
        } else {
            warn!(
                "No internet connection. Downloading artist images halted for {} seconds.",
                options.scan_interval.as_secs()
            );
        }

        report.catalog = self.catalog.stats();
        info!(
            "Session {} done: {} tracks, {} albums, {} artists",
            key, report.catalog.tracks, report.catalog.albums, report.catalog.artists
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::file_mtime;
    use crate::enrichment::EnrichmentError;
    use crate::scanner::HOME_SENTINEL;
    use crate::testing::{png_bytes, tags, temp_db, FakeExtractor, FakeImageSource, FixedProbe};
    use common::{Album, Artist};
    use crate::tagging::build_track;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        music: PathBuf,
        indexer: Indexer,
    }

    impl Fixture {
        fn path(&self, name: &str) -> String {
            self.music.join(name).to_string_lossy().to_string()
        }

        fn run(&self) -> Result<IngestReport, IngestError> {
            self.indexer.start_ingestion(self.indexer.next_key())
        }
    }

    fn extractor() -> FakeExtractor {
        FakeExtractor::default()
            .with_tags("a.mp3", tags("One", "Album A", "X", None))
            .with_tags("b.mp3", tags("Two", "Album A", "X", None))
            .with_tags("c.mp3", tags("Three", "Album B", "Y", None))
            .with_cover("a.mp3", png_bytes([200, 30, 30]))
            .with_cover("c.mp3", png_bytes([30, 30, 200]))
    }

    fn fixture(configure: impl FnOnce(Indexer) -> Indexer) -> Fixture {
        let (dir, db) = temp_db();
        let music = dir.path().join("music");
        fs::create_dir_all(&music).unwrap();
        for name in ["a.mp3", "b.mp3", "c.mp3"] {
            fs::write(music.join(name), b"audio").unwrap();
        }
        let options = IndexerOptions {
            root_dirs: vec![music.to_string_lossy().to_string()],
            home_dir: None,
            ..IndexerOptions::default()
        }
        .with_data_dir(dir.path());
        let indexer = configure(Indexer::new(db, options).with_extractor(Arc::new(extractor())));
        Fixture {
            dir,
            music,
            indexer,
        }
    }

    #[test]
    fn indexes_a_small_library() {
        let fx = fixture(|indexer| indexer);
        let report = fx.run().unwrap();

        assert!(!report.skipped);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.tagging.tagged, 3);
        assert_eq!(
            report.catalog,
            CatalogStats {
                tracks: 3,
                albums: 2,
                artists: 2
            }
        );
        assert_eq!(fx.indexer.db().get_all::<Album>().unwrap().len(), 2);
        assert_eq!(report.thumbnails.extracted, 2);
        assert_eq!(report.album_colors.processed, 2);
        assert!(report.enrichment.is_none());

        let thumbs = fs::read_dir(&fx.indexer.options().thumbnails_dir).unwrap().count();
        assert!(thumbs <= 2);
        let albums = fx.indexer.catalog().albums.snapshot();
        assert!(albums.iter().all(|a| a.image.is_some() && !a.colors.is_empty()));
    }

    #[test]
    fn second_run_adds_nothing() {
        let fx = fixture(|indexer| indexer);
        let first = fx.run().unwrap();
        let second = fx.run().unwrap();

        assert_eq!(second.untagged, 0);
        assert_eq!(second.tagging.tagged, 0);
        assert_eq!(second.tagging.new_albums, 0);
        assert_eq!(second.tagging.new_artists, 0);
        assert_eq!(second.thumbnails.extracted, 0);
        assert_eq!(second.catalog, first.catalog);
        assert_eq!(fx.indexer.db().get_all::<Track>().unwrap().len(), 3);
    }

    #[test]
    fn modified_file_is_reingested() {
        let fx = fixture(|indexer| indexer);
        fx.run().unwrap();

        let path = fx.path("a.mp3");
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(1_000_000))
            .unwrap();
        drop(file);

        let report = fx.run().unwrap();
        assert_eq!(report.modified, 1);
        assert_eq!(report.untagged, 1);
        assert_eq!(report.tagging.tagged, 1);

        let expected = file_mtime(Path::new(&path)).unwrap();
        let track: Track = fx.indexer.db().get(&path).unwrap().unwrap();
        assert_eq!(track.last_modified, expected);
        assert_eq!(fx.indexer.catalog().tracks.get(&path).unwrap().last_modified, expected);
        assert_eq!(report.catalog.tracks, 3);
    }

    #[test]
    fn deleted_file_is_removed() {
        let fx = fixture(|indexer| indexer);
        fx.run().unwrap();

        let path = fx.path("b.mp3");
        fs::remove_file(&path).unwrap();
        let report = fx.run().unwrap();

        assert_eq!(report.removed, 1);
        assert!(!fx.indexer.catalog().tracks.contains(&path));
        assert!(fx.indexer.db().get::<Track>(&path).unwrap().is_none());
        assert_eq!(report.catalog.tracks, 2);
    }

    #[test]
    fn newer_session_cancels_running_one() {
        let fx = fixture(|indexer| {
            let takeover = indexer.sessions().clone();
            let extractor = extractor().on_extract(move |name| {
                if name == "b.mp3" {
                    takeover.begin(takeover.next_key());
                }
            });
            indexer.with_extractor(Arc::new(extractor))
        });

        let result = fx.run();
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert!(fx.indexer.db().get_all::<Track>().unwrap().is_empty());
        assert_eq!(fx.indexer.catalog().stats(), CatalogStats::default());
        assert!(!fx.indexer.options().thumbnails_dir.exists());
    }

    fn assert_catalog_is_whole(db: &CatalogDb) {
        let tracks: Vec<Track> = db.get_all().unwrap();
        let albums: Vec<Album> = db.get_all().unwrap();
        let artists: Vec<Artist> = db.get_all().unwrap();
        assert_eq!((tracks.len(), albums.len(), artists.len()), (3, 2, 2));
        for track in &tracks {
            assert!(albums.iter().any(|a| a.albumhash == track.albumhash));
            for artist in track.all_artists() {
                assert!(artists.iter().any(|a| a.artisthash == artist.artisthash));
            }
        }
    }

    #[test]
    fn superseding_session_keeps_albums_and_artists() {
        let gate = Arc::new(Barrier::new(2));
        let paused = Arc::new(AtomicBool::new(false));
        let fx = fixture(|indexer| {
            let sessions = indexer.sessions().clone();
            let gate = Arc::clone(&gate);
            let paused = Arc::clone(&paused);
            // The first session stops inside b.mp3 until another one begins.
            let extractor = extractor().on_extract(move |name| {
                if name != "b.mp3" || paused.swap(true, Ordering::SeqCst) {
                    return;
                }
                let mine = sessions.current();
                gate.wait();
                while sessions.current() == mine {
                    thread::sleep(Duration::from_millis(1));
                }
            });
            indexer.with_extractor(Arc::new(extractor))
        });

        let (first, second) = thread::scope(|scope| {
            let first = scope.spawn(|| fx.run().map_err(|err| err.is_cancelled()));
            gate.wait();
            let second = scope.spawn(|| fx.run().map_err(|err| err.is_cancelled()));
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_eq!(first.err(), Some(true));
        let second = second.unwrap();
        assert_eq!(second.tagging.tagged, 3);
        assert_eq!(second.tagging.new_albums, 2);
        assert_eq!(second.tagging.new_artists, 2);
        assert_catalog_is_whole(fx.indexer.db());

        let restarted = Indexer::new(fx.indexer.db().clone(), fx.indexer.options().clone())
            .with_extractor(Arc::new(extractor()));
        let report = restarted.start_ingestion(restarted.next_key()).unwrap();
        assert_eq!(report.untagged, 0);
        assert_eq!(
            report.catalog,
            CatalogStats {
                tracks: 3,
                albums: 2,
                artists: 2
            }
        );
    }

    #[test]
    fn concurrent_sessions_leave_a_whole_catalog() {
        let fx = fixture(|indexer| indexer);
        let results: Vec<Result<IngestReport, bool>> = thread::scope(|scope| {
            let runs: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| fx.run().map_err(|err| err.is_cancelled())))
                .collect();
            runs.into_iter().map(|run| run.join().unwrap()).collect()
        });

        assert!(results.iter().all(|r| matches!(r, Ok(_) | Err(true))));
        assert!(results.iter().any(|r| r.is_ok()));
        assert_catalog_is_whole(fx.indexer.db());
    }

    #[test]
    fn favorites_are_applied_during_ingestion() {
        let fx = fixture(|indexer| indexer);
        let favorite = build_track(
            &fx.path("a.mp3"),
            0,
            &tags("One", "Album A", "X", None),
            &fx.indexer.options().artist_separators,
        );
        fx.indexer.db().set_favorite(&favorite.trackhash, true).unwrap();

        fx.run().unwrap();
        let tracks = &fx.indexer.catalog().tracks;
        assert!(tracks.get(&fx.path("a.mp3")).unwrap().is_favorite);
        assert!(!tracks.get(&fx.path("b.mp3")).unwrap().is_favorite);
    }

    #[test]
    fn network_failure_leaves_catalog_untouched() {
        let source = FakeImageSource::default()
            .failing_on("X", EnrichmentError::Connection("reset".to_string()))
            .failing_on("Y", EnrichmentError::Timeout("slow".to_string()));
        let fx = fixture(|indexer| {
            indexer
                .with_probe(Arc::new(FixedProbe(true)))
                .with_image_source(Arc::new(source))
        });

        let report = fx.run().unwrap();
        let enrichment = report.enrichment.unwrap();
        assert!(enrichment.aborted);
        assert_eq!(enrichment.downloaded, 0);
        assert!(report.artist_colors_after_enrichment.is_none());
        assert_eq!(report.catalog.tracks, 3);

        let artists: Vec<Artist> = fx.indexer.db().get_all().unwrap();
        assert!(artists.iter().all(|a| a.image.is_none()));
    }

    #[test]
    fn downloaded_artist_images_get_colors() {
        let source = FakeImageSource::default().with_image("X", png_bytes([10, 200, 10]));
        let fx = fixture(|indexer| {
            indexer
                .with_probe(Arc::new(FixedProbe(true)))
                .with_image_source(Arc::new(source))
        });

        let report = fx.run().unwrap();
        assert_eq!(report.enrichment.unwrap().downloaded, 1);
        assert_eq!(report.artist_colors.processed, 0);
        assert_eq!(report.artist_colors_after_enrichment.unwrap().processed, 1);

        let x = Artist::new("X");
        let stored: Artist = fx.indexer.db().get(&x.artisthash).unwrap().unwrap();
        assert_eq!(stored.image, Some(x.image_name()));
        assert_eq!(stored.colors.len(), 1);
    }

    #[test]
    fn missing_roots_skip_the_run() {
        let fx = fixture(|indexer| {
            let options = IndexerOptions {
                root_dirs: Vec::new(),
                ..indexer.options().clone()
            };
            let db = indexer.db().clone();
            Indexer::new(db, options)
        });

        let report = fx.run().unwrap();
        assert!(report.skipped);
        assert_eq!(report.scanned, 0);
        assert!(fx.indexer.db().get_all::<Track>().unwrap().is_empty());
        assert!(fx.dir.path().join("catalog.redb").exists());
    }

    #[test]
    fn home_sentinel_uses_home_dir() {
        let fx = fixture(|indexer| {
            let music = PathBuf::from(&indexer.options().root_dirs[0]);
            let options = IndexerOptions {
                root_dirs: vec![HOME_SENTINEL.to_string(), String::new()],
                home_dir: Some(music),
                ..indexer.options().clone()
            };
            let db = indexer.db().clone();
            Indexer::new(db, options).with_extractor(Arc::new(extractor()))
        });
        let report = fx.run().unwrap();
        assert!(!report.skipped);
        assert_eq!(report.scanned, 3);
    }
}
