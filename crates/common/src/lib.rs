use serde::{Deserialize, Serialize};

const HASH_LEN: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRef {
    pub name: String,
    pub artisthash: String,
}

impl ArtistRef {
    pub fn new(name: &str) -> Self {
        let name = name.trim().to_string();
        let artisthash = create_hash(&[name.as_str()]);
        Self { name, artisthash }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub trackhash: String,
    pub filepath: String,
    pub folder: String,
    pub title: String,
    pub album: String,
    pub albumhash: String,
    pub artists: Vec<ArtistRef>,
    pub albumartists: Vec<ArtistRef>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: u32,
    pub bitrate: Option<u32>,
    #[serde(default)]
    pub genres: Vec<String>,
    /// File mtime in nanoseconds since the unix epoch, captured when the file was tagged.
    pub last_modified: u64,
    #[serde(default)]
    pub is_favorite: bool,
    /// Artwork file name, relative to the thumbnails directory.
    pub image: String,
}

impl Track {
    /// Every artist referenced by the track, track artists first, without repeats.
    pub fn all_artists(&self) -> Vec<&ArtistRef> {
        let mut out: Vec<&ArtistRef> = Vec::new();
        for artist in self.artists.iter().chain(self.albumartists.iter()) {
            if !out.iter().any(|seen| seen.artisthash == artist.artisthash) {
                out.push(artist);
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub albumhash: String,
    pub title: String,
    pub albumartists: Vec<ArtistRef>,
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

impl Album {
    /// Builds the album a track belongs to. The first track seen for a hash wins.
    pub fn from_track(track: &Track) -> Self {
        Self {
            albumhash: track.albumhash.clone(),
            title: track.album.clone(),
            albumartists: track.albumartists.clone(),
            year: track.year,
            genres: track.genres.clone(),
            image: None,
            colors: Vec::new(),
        }
    }

    pub fn image_name(&self) -> String {
        image_name(&self.albumhash)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub artisthash: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
}

impl Artist {
    pub fn new(name: &str) -> Self {
        let artist = ArtistRef::new(name);
        Self {
            artisthash: artist.artisthash,
            name: artist.name,
            image: None,
            colors: Vec::new(),
        }
    }

    pub fn image_name(&self) -> String {
        image_name(&self.artisthash)
    }
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Identity hash over metadata fields. Case, spacing and punctuation do not
/// change the result.
pub fn create_hash(parts: &[&str]) -> String {
    let mut normalized = String::new();
    for part in parts {
        for ch in part.chars().flat_map(char::to_lowercase) {
            if ch.is_alphanumeric() {
                normalized.push(ch);
            }
        }
    }
    let mut hash = stable_id(&normalized);
    hash.truncate(HASH_LEN);
    hash
}

pub fn album_hash(title: &str, albumartists: &[ArtistRef]) -> String {
    let mut parts: Vec<&str> = vec![title];
    parts.extend(albumartists.iter().map(|artist| artist.name.as_str()));
    create_hash(&parts)
}

pub fn track_hash(artists: &[ArtistRef], album: &str, title: &str) -> String {
    let mut parts: Vec<&str> = artists.iter().map(|artist| artist.name.as_str()).collect();
    parts.push(album);
    parts.push(title);
    create_hash(&parts)
}

pub fn image_name(hash: &str) -> String {
    format!("{}.png", hash)
}
