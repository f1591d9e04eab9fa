use std::fs;
use std::path::Path;
use std::time::Duration;

use common::Artist;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::db::CatalogDb;
use crate::error::LibraryError;
use crate::store::Catalog;
use crate::thumbnails::save_png;

/// Tells whether the network source is worth trying at all.
pub trait ConnectivityProbe: Send + Sync {
    fn reachable(&self) -> bool;
}

/// Probe for offline runs. Never reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct Offline;

impl ConnectivityProbe for Offline {
    fn reachable(&self) -> bool {
        false
    }
}

/// Looks up artwork for an artist by name.
pub trait ArtistImageSource: Send + Sync {
    /// `Ok(None)` when the source has no image for this artist.
    fn fetch_artist_image(&self, artist_name: &str) -> Result<Option<Vec<u8>>, EnrichmentError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoArtistImages;

impl ArtistImageSource for NoArtistImages {
    fn fetch_artist_image(&self, _artist_name: &str) -> Result<Option<Vec<u8>>, EnrichmentError> {
        Ok(None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrichmentError {
    Connection(String),
    Timeout(String),
    Other(String),
}

impl EnrichmentError {
    /// Connection loss ends the stage; anything else only skips one artist.
    pub fn aborts_stage(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

impl std::fmt::Display for EnrichmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Timeout(msg) => write!(f, "request timed out: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EnrichmentError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentReport {
    pub attempted: usize,
    pub downloaded: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped_recent: usize,
    pub aborted: bool,
}

fn attempt_key(artisthash: &str) -> String {
    format!("artist:{}", artisthash)
}

/// Downloads images for artists that have none on disk yet.
///
/// Only persistence errors are returned; everything the source reports is
/// absorbed here. A connection error or timeout stops the stage and leaves the
/// remaining artists for a later run.
pub fn download_missing_artist_images(
    catalog: &Catalog,
    db: &CatalogDb,
    source: &dyn ArtistImageSource,
    artist_images_dir: &Path,
    retry_interval: Duration,
    max_edge: u32,
) -> Result<EnrichmentReport, LibraryError> {
    fs::create_dir_all(artist_images_dir)?;
    let mut report = EnrichmentReport::default();

    for artist in catalog.artists.snapshot() {
        let target = artist_images_dir.join(artist.image_name());
        if target.exists() {
            if artist.image.is_none() {
                set_artist_image(catalog, db, &artist)?;
            }
            continue;
        }

        let key = attempt_key(&artist.artisthash);
        if !db.should_attempt_external(&key, retry_interval)? {
            report.skipped_recent += 1;
            continue;
        }
        report.attempted += 1;

        // A lost connection is not recorded as an attempt.
        let succeeded = match source.fetch_artist_image(&artist.name) {
            Ok(Some(bytes)) => match save_png(&bytes, &target, max_edge) {
                Ok(()) => {
                    set_artist_image(catalog, db, &artist)?;
                    report.downloaded += 1;
                    true
                }
                Err(err) => {
                    warn!("Failed to store image for artist '{}': {}", artist.name, err);
                    report.failed += 1;
                    false
                }
            },
            Ok(None) => {
                debug!("No image found for artist '{}'", artist.name);
                report.not_found += 1;
                false
            }
            Err(err) if err.aborts_stage() => {
                error!("Internet connection lost. Downloading artist images stopped.");
                debug!("Artist image request for '{}' failed: {}", artist.name, err);
                report.aborted = true;
                break;
            }
            Err(err) => {
                warn!("Failed to fetch image for artist '{}': {}", artist.name, err);
                report.failed += 1;
                false
            }
        };
        db.record_external_attempt(&key, succeeded)?;
    }

    info!(
        "Artist images: {} downloaded, {} not found, {} failed, {} skipped",
        report.downloaded, report.not_found, report.failed, report.skipped_recent
    );
    Ok(report)
}

fn set_artist_image(catalog: &Catalog, db: &CatalogDb, artist: &Artist) -> Result<(), LibraryError> {
    let name = artist.image_name();
    catalog
        .artists
        .update(&artist.artisthash, |a| a.image = Some(name.clone()));
    db.update_by_key::<Artist, _>(&artist.artisthash, |a| a.image = Some(name))?;
    Ok(())
}
