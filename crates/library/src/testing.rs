use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Track;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use metadata::{CoverArt, MetadataError, TagInfo};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::db::CatalogDb;
use crate::enrichment::{ArtistImageSource, ConnectivityProbe, EnrichmentError};
use crate::tagging::{build_track, TagExtractor};

pub fn temp_db() -> (TempDir, CatalogDb) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = CatalogDb::open(&dir.path().join("catalog.redb")).expect("open catalog");
    (dir, db)
}

/// Tags for one file. `artists` defaults to the album artist.
pub fn tags(title: &str, album: &str, albumartist: &str, artists: Option<&str>) -> TagInfo {
    TagInfo {
        title: Some(title.to_string()),
        album: Some(album.to_string()),
        artists: vec![artists.unwrap_or(albumartist).to_string()],
        album_artists: vec![albumartist.to_string()],
        ..TagInfo::default()
    }
}

pub fn sample_track(filepath: &str, album: &str, artist: &str, title: &str) -> Track {
    build_track(
        filepath,
        0,
        &tags(title, album, artist, None),
        &[";".to_string()],
    )
}

pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(color)));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).expect("encode png");
    out.into_inner()
}

type ExtractHook = Box<dyn Fn(&str) + Send + Sync>;

/// Extractor keyed by file name. Files without tags read as unsupported.
#[derive(Default)]
pub struct FakeExtractor {
    tags: HashMap<String, TagInfo>,
    covers: HashMap<String, Vec<u8>>,
    hook: Option<ExtractHook>,
    cover_reads: AtomicUsize,
}

impl FakeExtractor {
    pub fn with_tags(mut self, name: &str, info: TagInfo) -> Self {
        self.tags.insert(name.to_string(), info);
        self
    }

    pub fn with_cover(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.covers.insert(name.to_string(), bytes);
        self
    }

    pub fn on_extract<F: Fn(&str) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn cover_reads(&self) -> usize {
        self.cover_reads.load(Ordering::SeqCst)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl TagExtractor for FakeExtractor {
    fn extract(&self, path: &Path) -> Option<TagInfo> {
        let name = file_name(path);
        let found = self.tags.get(&name).cloned();
        if let Some(hook) = &self.hook {
            hook(&name);
        }
        found
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<CoverArt>, MetadataError> {
        self.cover_reads.fetch_add(1, Ordering::SeqCst);
        let name = file_name(path);
        if name.starts_with("corrupt") {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "corrupt file",
            )));
        }
        Ok(self
            .covers
            .get(&name)
            .map(|data| CoverArt { data: data.clone() }))
    }
}

pub struct FixedProbe(pub bool);

impl ConnectivityProbe for FixedProbe {
    fn reachable(&self) -> bool {
        self.0
    }
}

/// Image source answering from a name map. Names listed in `fail_on` raise
/// the configured error instead.
#[derive(Default)]
pub struct FakeImageSource {
    images: HashMap<String, Vec<u8>>,
    fail_on: HashMap<String, EnrichmentError>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeImageSource {
    pub fn with_image(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(name.to_string(), bytes);
        self
    }

    pub fn failing_on(mut self, name: &str, err: EnrichmentError) -> Self {
        self.fail_on.insert(name.to_string(), err);
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

impl ArtistImageSource for FakeImageSource {
    fn fetch_artist_image(&self, artist_name: &str) -> Result<Option<Vec<u8>>, EnrichmentError> {
        self.requests.lock().push(artist_name.to_string());
        if let Some(err) = self.fail_on.get(artist_name) {
            return Err(err.clone());
        }
        Ok(self.images.get(artist_name).cloned())
    }
}
