use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use common::Album;
use image::{GenericImageView, ImageFormat};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::CatalogDb;
use crate::error::LibraryError;
use crate::store::{Catalog, TrackStore};
use crate::tagging::TagExtractor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    Extracted,
    /// The album image was already on disk.
    Present,
    NoArtwork,
    NoTracks,
    Failed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ThumbnailReport {
    pub extracted: usize,
    pub present: usize,
    pub no_artwork: usize,
    pub no_tracks: usize,
    pub failed: usize,
}

impl ThumbnailReport {
    fn record(&mut self, outcome: ThumbnailOutcome) {
        match outcome {
            ThumbnailOutcome::Extracted => self.extracted += 1,
            ThumbnailOutcome::Present => self.present += 1,
            ThumbnailOutcome::NoArtwork => self.no_artwork += 1,
            ThumbnailOutcome::NoTracks => self.no_tracks += 1,
            ThumbnailOutcome::Failed => self.failed += 1,
        }
    }
}

/// Makes sure every album has an image in `thumbnails_dir`, using `workers`
/// threads. Each worker takes the next album from a shared cursor and reads the
/// cover of the album's first track. Albums fail independently.
pub fn extract_album_thumbnails(
    catalog: &Catalog,
    db: &CatalogDb,
    extractor: &dyn TagExtractor,
    thumbnails_dir: &Path,
    workers: usize,
    max_edge: u32,
) -> Result<ThumbnailReport, LibraryError> {
    fs::create_dir_all(thumbnails_dir)?;

    let albums = catalog.albums.snapshot();
    let cursor = AtomicUsize::new(0);
    let workers = workers.max(1).min(albums.len().max(1));

    let outcomes: Vec<(usize, ThumbnailOutcome)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(album) = albums.get(index) else {
                            break;
                        };
                        let outcome = extract_album_thumbnail(
                            album,
                            &catalog.tracks,
                            extractor,
                            thumbnails_dir,
                            max_edge,
                        );
                        done.push((index, outcome));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(done) => done,
                Err(_) => {
                    error!("Thumbnail worker panicked");
                    Vec::new()
                }
            })
            .collect()
    });

    let mut report = ThumbnailReport::default();
    for (index, outcome) in outcomes {
        report.record(outcome);
        let album = &albums[index];
        let has_image = matches!(
            outcome,
            ThumbnailOutcome::Extracted | ThumbnailOutcome::Present
        );
        if has_image && album.image.is_none() {
            let name = album.image_name();
            catalog.albums.update(&album.albumhash, |a| a.image = Some(name.clone()));
            db.update_by_key::<Album, _>(&album.albumhash, |a| a.image = Some(name))?;
        }
    }

    info!(
        "Album images: {} extracted, {} present, {} without artwork, {} failed",
        report.extracted, report.present, report.no_artwork, report.failed
    );
    Ok(report)
}

fn extract_album_thumbnail(
    album: &Album,
    tracks: &TrackStore,
    extractor: &dyn TagExtractor,
    thumbnails_dir: &Path,
    max_edge: u32,
) -> ThumbnailOutcome {
    let target = thumbnails_dir.join(album.image_name());
    if target.exists() {
        return ThumbnailOutcome::Present;
    }
    let track = match tracks.first_for_album(&album.albumhash) {
        Some(track) => track,
        None => return ThumbnailOutcome::NoTracks,
    };
    match extractor.extract_cover(Path::new(&track.filepath)) {
        Ok(Some(cover)) => match save_png(&cover.data, &target, max_edge) {
            Ok(()) => ThumbnailOutcome::Extracted,
            Err(err) => {
                warn!("Failed to store cover for album '{}': {}", album.title, err);
                ThumbnailOutcome::Failed
            }
        },
        Ok(None) => ThumbnailOutcome::NoArtwork,
        Err(err) => {
            warn!("Failed to read cover from {}: {}", track.filepath, err);
            ThumbnailOutcome::Failed
        }
    }
}

/// Decodes `bytes`, shrinks them to fit `max_edge` and writes a PNG to
/// `target` through a temporary file so readers never see partial images.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn save_png(bytes: &[u8], target: &Path, max_edge: u32) -> Result<(), LibraryError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    let image = if width > max_edge || height > max_edge {
        image.thumbnail(max_edge, max_edge)
    } else {
        image
    };

    // Overlapping sessions may write the same target.
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp = target.with_extension(format!("png.{}.{}.part", std::process::id(), seq));
    if let Err(err) = image.save_with_format(&temp, ImageFormat::Png) {
        let _ = fs::remove_file(&temp);
        return Err(err.into());
    }
    fs::rename(&temp, target)?;
    Ok(())
}
