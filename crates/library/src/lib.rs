mod changes;
mod colors;
mod db;
mod enrichment;
mod error;
mod pipeline;
mod scanner;
mod session;
mod store;
mod tagging;
#[cfg(test)]
mod testing;
mod thumbnails;

pub use changes::{detect_changes, detect_changes_with, file_mtime, ChangeSet};
pub use colors::{extract_palette, process_album_colors, process_artist_colors, ColorReport};
pub use db::{CatalogDb, Record, CATALOG_VERSION};
pub use enrichment::{
    download_missing_artist_images, ArtistImageSource, ConnectivityProbe, EnrichmentError,
    EnrichmentReport, NoArtistImages, Offline,
};
pub use error::{IngestError, LibraryError};
pub use pipeline::{Indexer, IndexerOptions, IngestReport};
pub use scanner::{is_supported, resolve_root_dirs, scan_roots, HOME_SENTINEL, SUPPORTED_EXTENSIONS};
pub use session::{Session, SessionKey, SessionManager};
pub use store::{AlbumStore, ArtistStore, Catalog, CatalogStats, HashStore, TrackStore};
pub use tagging::{build_track, split_artists, tag_untagged, LoftyExtractor, TagExtractor, TagReport};
pub use thumbnails::{extract_album_thumbnails, ThumbnailOutcome, ThumbnailReport};
