use std::collections::HashSet;
use std::path::Path;

use common::{album_hash, image_name, track_hash, Album, Artist, ArtistRef, Track};
use metadata::{read_cover, read_tags, CoverArt, MetadataError, TagInfo};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::changes::file_mtime;
use crate::db::CatalogDb;
use crate::error::IngestError;
use crate::session::Session;
use crate::store::Catalog;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Reads tags and artwork from audio files.
pub trait TagExtractor: Send + Sync {
    /// `None` when the file cannot be read or is not a supported format.
    fn extract(&self, path: &Path) -> Option<TagInfo>;

    fn extract_cover(&self, path: &Path) -> Result<Option<CoverArt>, MetadataError>;
}

/// [`TagExtractor`] backed by lofty.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyExtractor;

impl TagExtractor for LoftyExtractor {
    fn extract(&self, path: &Path) -> Option<TagInfo> {
        match read_tags(path) {
            Ok(tags) => Some(tags),
            Err(err) => {
                debug!("Failed to read tags for {:?}: {}", path, err);
                None
            }
        }
    }

    fn extract_cover(&self, path: &Path) -> Result<Option<CoverArt>, MetadataError> {
        read_cover(path)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TagReport {
    pub attempted: usize,
    pub tagged: usize,
    pub new_albums: usize,
    pub new_artists: usize,
}

/// Splits joined artist names ("A; B", "A / B") on the configured separators.
pub fn split_artists(values: &[String], separators: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let mut parts: Vec<&str> = vec![value.as_str()];
        for separator in separators.iter().filter(|s| !s.is_empty()) {
            parts = parts
                .into_iter()
                .flat_map(|part| part.split(separator.as_str()))
                .collect();
        }
        for part in parts {
            let name = part.trim();
            if name.is_empty() {
                continue;
            }
            if !out.iter().any(|seen| seen.eq_ignore_ascii_case(name)) {
                out.push(name.to_string());
            }
        }
    }
    out
}

pub fn build_track(
    filepath: &str,
    last_modified: u64,
    tags: &TagInfo,
    separators: &[String],
) -> Track {
    let path = Path::new(filepath);
    let folder = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let title = tags.title.clone().unwrap_or_else(|| file_stem(path));
    let album = tags
        .album
        .clone()
        .or_else(|| {
            path.parent()
                .and_then(|p| p.file_name())
                .map(|s| s.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

    let mut artist_names = split_artists(&tags.artists, separators);
    let mut albumartist_names = split_artists(&tags.album_artists, separators);
    if artist_names.is_empty() {
        artist_names = if albumartist_names.is_empty() {
            vec![UNKNOWN_ARTIST.to_string()]
        } else {
            albumartist_names.clone()
        };
    }
    if albumartist_names.is_empty() {
        albumartist_names = artist_names.clone();
    }

    let artists: Vec<ArtistRef> = artist_names.iter().map(|n| ArtistRef::new(n)).collect();
    let albumartists: Vec<ArtistRef> =
        albumartist_names.iter().map(|n| ArtistRef::new(n)).collect();

    let albumhash = album_hash(&album, &albumartists);
    let trackhash = track_hash(&artists, &album, &title);

    Track {
        trackhash,
        filepath: filepath.to_string(),
        folder,
        title,
        image: image_name(&albumhash),
        album,
        albumhash,
        artists,
        albumartists,
        track_no: tags.track_no,
        disc_no: tags.disc_no,
        year: tags.year,
        duration_ms: tags.duration_ms.unwrap_or(0),
        bitrate: tags.bitrate,
        genres: tags.genres.clone(),
        last_modified,
        is_favorite: false,
    }
}

/// Reads tags for every untagged file, adds the tracks plus any new albums and
/// artists to the catalog, then persists everything in one write.
///
/// The session is checked before each file; when a newer session has started
/// the stage returns [`IngestError::Cancelled`] and nothing from this call is
/// persisted.
pub fn tag_untagged(
    catalog: &Catalog,
    db: &CatalogDb,
    extractor: &dyn TagExtractor,
    session: &Session,
    untagged: &[String],
    favorites: &HashSet<String>,
    separators: &[String],
) -> Result<TagReport, IngestError> {
    info!("Found {} new tracks", untagged.len());

    let mut report = TagReport {
        attempted: untagged.len(),
        ..TagReport::default()
    };
    let mut tracks: Vec<Track> = Vec::new();
    let mut albums: Vec<Album> = Vec::new();
    let mut artists: Vec<Artist> = Vec::new();

    for filepath in untagged {
        session.check()?;

        let path = Path::new(filepath);
        let last_modified = match file_mtime(path) {
            Some(mtime) => mtime,
            None => {
                warn!("File vanished before it could be read: {}", filepath);
                continue;
            }
        };
        let tags = match extractor.extract(path) {
            Some(tags) => tags,
            None => {
                warn!("Could not read file: {}", filepath);
                continue;
            }
        };

        let mut track = build_track(filepath, last_modified, &tags, separators);
        track.is_favorite = favorites.contains(&track.trackhash);

        if !catalog.albums.exists(&track.albumhash) {
            let album = Album::from_track(&track);
            catalog.albums.add(album.clone());
            albums.push(album);
        }

        for artist_ref in track.all_artists() {
            if !catalog.artists.exists(&artist_ref.artisthash) {
                let artist = Artist::new(&artist_ref.name);
                catalog.artists.add(artist.clone());
                artists.push(artist);
            }
        }

        catalog.tracks.add(track.clone());
        tracks.push(track);
        report.tagged += 1;
    }

    report.new_albums = albums.len();
    report.new_artists = artists.len();

    if !tracks.is_empty() {
        info!("Adding {} tracks to database", tracks.len());
        db.commit_batch(&tracks, &albums, &artists)?;
    }

    info!("Added {}/{} tracks", report.tagged, report.attempted);
    Ok(report)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown Track".to_string())
}
