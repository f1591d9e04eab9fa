use std::path::Path;

use lofty::error::LoftyError;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile, ItemKey, TaggedFileExt};
use lofty::tag::Tag;

/// Raw tag values for one file. Artist fields keep every value the tag carries;
/// splitting joined names is left to the caller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    pub album: Option<String>,
    pub artists: Vec<String>,
    pub album_artists: Vec<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
    pub bitrate: Option<u32>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CoverArt {
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

pub fn read_tags(path: &Path) -> Result<TagInfo, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let mut info = TagInfo::default();

    let duration_ms = properties.duration().as_millis();
    if duration_ms > 0 {
        info.duration_ms = Some(duration_ms.min(u128::from(u32::MAX)) as u32);
    }
    info.bitrate = properties.audio_bitrate().or(properties.overall_bitrate());

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.title = non_empty(tag.title().map(|v| v.to_string()));
        info.album = non_empty(tag.album().map(|v| v.to_string()));
        info.artists = collect_strings(tag, &ItemKey::TrackArtist);
        info.album_artists = collect_strings(tag, &ItemKey::AlbumArtist);
        info.track_no = tag.get_string(&ItemKey::TrackNumber).and_then(parse_u16);
        info.disc_no = tag.get_string(&ItemKey::DiscNumber).and_then(parse_u16);
        info.year = tag.get_string(&ItemKey::Year).and_then(parse_year);
        if let Some(value) = tag.get_string(&ItemKey::Genre) {
            info.genres = parse_genres(value);
        }
    }

    Ok(info)
}

pub fn read_cover(path: &Path) -> Result<Option<CoverArt>, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    for tag in tagged_file.tags() {
        if let Some(picture) = pick_picture(tag.pictures()) {
            return Ok(Some(CoverArt {
                data: picture.data().to_vec(),
            }));
        }
    }
    Ok(None)
}

fn collect_strings(tag: &Tag, key: &ItemKey) -> Vec<String> {
    tag.get_strings(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

fn parse_genres(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in text.split(&[';', ',', '/', '|', '\0'][..]) {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.iter().any(|g| g.eq_ignore_ascii_case(trimmed)) {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    pictures
        .iter()
        .find(|picture| picture.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_numbers_with_totals() {
        assert_eq!(parse_u16("3/12"), Some(3));
        assert_eq!(parse_u16(" 7 "), Some(7));
        assert_eq!(parse_u16("side A"), None);
    }

    #[test]
    fn parses_year_from_dates() {
        assert_eq!(parse_year("1997-05-21"), Some(1997));
        assert_eq!(parse_year("(2004)"), Some(2004));
        assert_eq!(parse_year("97"), None);
    }

    #[test]
    fn splits_and_dedupes_genres() {
        assert_eq!(
            parse_genres("Rock; Indie/rock, indie"),
            vec!["Rock".to_string(), "Indie".to_string()]
        );
        assert!(parse_genres(" ; ").is_empty());
    }

    #[test]
    fn prefers_front_cover() {
        let picture = |pic_type, data: &[u8]| {
            Picture::new_unchecked(pic_type, None, None, data.to_vec())
        };
        let pictures = vec![
            picture(PictureType::CoverBack, b"back"),
            picture(PictureType::CoverFront, b"front"),
        ];
        assert_eq!(pick_picture(&pictures).map(|p| p.data()), Some(&b"front"[..]));
        assert_eq!(pick_picture(&pictures[..1]).map(|p| p.data()), Some(&b"back"[..]));
        assert!(pick_picture(&[]).is_none());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let missing = Path::new("/definitely/not/here.mp3");
        assert!(read_tags(missing).is_err());
        assert!(read_cover(missing).is_err());
    }
}
