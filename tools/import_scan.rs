use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::{CatalogDb, Indexer, IndexerOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let index_path = PathBuf::from(
        args.next()
            .or_else(|| env::var("INDEX_PATH").ok())
            .unwrap_or_else(|| "data/catalog.redb".to_string()),
    );

    let data_dir = index_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    fs::create_dir_all(&data_dir)?;

    let db = CatalogDb::open(&index_path)?;
    let options = IndexerOptions {
        root_dirs: vec![music_root],
        ..IndexerOptions::default()
    }
    .with_data_dir(&data_dir);

    let indexer = Indexer::new(db, options);
    let report = indexer.start_ingestion(indexer.next_key())?;
    info!(
        "Indexed: {} artists, {} albums, {} tracks",
        report.catalog.artists, report.catalog.albums, report.catalog.tracks
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
