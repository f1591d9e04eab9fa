use std::collections::HashMap;
use std::path::Path;

use common::{Album, Artist};
use image::imageops::FilterType;
use image::GenericImageView;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::CatalogDb;
use crate::error::LibraryError;
use crate::store::Catalog;

const SAMPLE_EDGE: u32 = 64;
const MIN_ALPHA: u8 = 128;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ColorReport {
    pub processed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Bucket {
    count: u64,
    r: u64,
    g: u64,
    b: u64,
}

/// Dominant colors of an image as `#rrggbb`, most common first.
///
/// Pixels are grouped by the top four bits of each channel; every group is
/// reported as the mean of its pixels. Mostly transparent pixels are ignored.
pub fn extract_palette(path: &Path, size: usize) -> Result<Vec<String>, LibraryError> {
    let image = image::open(path)?;
    let (width, height) = image.dimensions();
    let sample = if width > SAMPLE_EDGE || height > SAMPLE_EDGE {
        image.resize(SAMPLE_EDGE, SAMPLE_EDGE, FilterType::Nearest)
    } else {
        image
    }
    .to_rgba8();

    let mut buckets: HashMap<u16, Bucket> = HashMap::new();
    for pixel in sample.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < MIN_ALPHA {
            continue;
        }
        let key = (u16::from(r >> 4) << 8) | (u16::from(g >> 4) << 4) | u16::from(b >> 4);
        let bucket = buckets.entry(key).or_default();
        bucket.count += 1;
        bucket.r += u64::from(r);
        bucket.g += u64::from(g);
        bucket.b += u64::from(b);
    }

    let mut ranked: Vec<(u16, Bucket)> = buckets.into_iter().collect();
    ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(&b.0)));

    Ok(ranked
        .into_iter()
        .take(size)
        .map(|(_, bucket)| {
            format!(
                "#{:02x}{:02x}{:02x}",
                bucket.r / bucket.count,
                bucket.g / bucket.count,
                bucket.b / bucket.count
            )
        })
        .collect())
}

/// Fills in colors for albums that have an image but no palette yet.
pub fn process_album_colors(
    catalog: &Catalog,
    db: &CatalogDb,
    thumbnails_dir: &Path,
    size: usize,
) -> Result<ColorReport, LibraryError> {
    let mut report = ColorReport::default();
    for album in catalog.albums.snapshot() {
        if !album.colors.is_empty() {
            continue;
        }
        let Some(image) = album.image.as_deref() else {
            continue;
        };
        match extract_palette(&thumbnails_dir.join(image), size) {
            Ok(colors) if !colors.is_empty() => {
                catalog
                    .albums
                    .update(&album.albumhash, |a| a.colors = colors.clone());
                db.update_by_key::<Album, _>(&album.albumhash, |a| a.colors = colors)?;
                report.processed += 1;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Failed to read colors for album '{}': {}", album.title, err);
                report.failed += 1;
            }
        }
    }
    info!("Album colors: {} processed, {} failed", report.processed, report.failed);
    Ok(report)
}

/// Fills in colors for artists that have an image but no palette yet.
pub fn process_artist_colors(
    catalog: &Catalog,
    db: &CatalogDb,
    artist_images_dir: &Path,
    size: usize,
) -> Result<ColorReport, LibraryError> {
    let mut report = ColorReport::default();
    for artist in catalog.artists.snapshot() {
        if !artist.colors.is_empty() {
            continue;
        }
        let Some(image) = artist.image.as_deref() else {
            continue;
        };
        match extract_palette(&artist_images_dir.join(image), size) {
            Ok(colors) if !colors.is_empty() => {
                catalog
                    .artists
                    .update(&artist.artisthash, |a| a.colors = colors.clone());
                db.update_by_key::<Artist, _>(&artist.artisthash, |a| a.colors = colors)?;
                report.processed += 1;
            }
            Ok(_) => {}
            Err(err) => {
                warn!("Failed to read colors for artist '{}': {}", artist.name, err);
                report.failed += 1;
            }
        }
    }
    info!("Artist colors: {} processed, {} failed", report.processed, report.failed);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png_bytes, sample_track, temp_db};
    use image::{Rgb, RgbImage};
    use std::fs;

    #[test]
    fn palette_orders_by_population() {
        let dir = tempfile::tempdir().unwrap();
        let mut img = RgbImage::from_pixel(64, 64, Rgb([250, 10, 10]));
        for x in 0..16 {
            for y in 0..64 {
                img.put_pixel(x, y, Rgb([10, 10, 250]));
            }
        }
        let path = dir.path().join("split.png");
        img.save(&path).unwrap();

        let colors = extract_palette(&path, 5).unwrap();
        assert_eq!(colors.len(), 2);
        assert_eq!(colors[0], "#fa0a0a");
        assert_eq!(colors[1], "#0a0afa");
        assert_eq!(extract_palette(&path, 1).unwrap().len(), 1);
    }

    #[test]
    fn album_colors_are_computed_once() {
        let (dir, db) = temp_db();
        let catalog = Catalog::default();
        let mut album = Album::from_track(&sample_track("/m/a.mp3", "A", "X", "One"));
        album.image = Some(album.image_name());
        catalog.albums.add(album.clone());
        db.insert_one(&album).unwrap();

        let mut bare = Album::from_track(&sample_track("/m/b.mp3", "B", "Y", "Two"));
        bare.image = None;
        catalog.albums.add(bare);

        fs::write(dir.path().join(album.image_name()), png_bytes([0, 128, 0])).unwrap();

        let first = process_album_colors(&catalog, &db, dir.path(), 3).unwrap();
        assert_eq!(first.processed, 1);
        let stored: Album = db.get(&album.albumhash).unwrap().unwrap();
        assert_eq!(stored.colors, vec!["#008000".to_string()]);

        let second = process_album_colors(&catalog, &db, dir.path(), 3).unwrap();
        assert_eq!(second, ColorReport::default());
    }

    #[test]
    fn missing_artist_image_counts_as_failure() {
        let (dir, db) = temp_db();
        let catalog = Catalog::default();
        let mut artist = Artist::new("X");
        artist.image = Some(artist.image_name());
        catalog.artists.add(artist.clone());
        db.insert_one(&artist).unwrap();

        let report = process_artist_colors(&catalog, &db, dir.path(), 3).unwrap();
        assert_eq!(report.failed, 1);
        assert!(catalog.artists.get(&artist.artisthash).unwrap().colors.is_empty());
    }
}
