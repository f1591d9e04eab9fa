use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{Album, Artist, Track};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LibraryError;

pub const CATALOG_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const FAVORITES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("favorites");
const EXTERNAL_ATTEMPTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("external_attempts");

const META_VERSION_KEY: &str = "version";

/// A catalog entity stored as one bincode row keyed by its natural key.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    fn key(&self) -> &str;
}

impl Record for Track {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = TRACKS_TABLE;

    fn key(&self) -> &str {
        &self.filepath
    }
}

impl Record for Album {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = ALBUMS_TABLE;

    fn key(&self) -> &str {
        &self.albumhash
    }
}

impl Record for Artist {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = ARTISTS_TABLE;

    fn key(&self) -> &str {
        &self.artisthash
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ExternalAttempt {
    last_attempt: u64,
    last_success: Option<u64>,
}

/// Persistent mirror of the catalog.
#[derive(Clone)]
pub struct CatalogDb {
    db: Arc<Database>,
}

impl CatalogDb {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let catalog = Self { db: Arc::new(db) };
        match read_version(&catalog.db)? {
            Some(version) if version == CATALOG_VERSION => {
                info!("Loaded catalog from {:?}", path);
            }
            Some(version) => {
                warn!("Catalog version mismatch ({}); dropping catalog tables", version);
                catalog.reset()?;
            }
            None => {
                info!("Catalog missing; creating {:?}", path);
                catalog.reset()?;
            }
        }
        Ok(catalog)
    }

    fn reset(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, TRACKS_TABLE)?;
        clear_table(&write_txn, ALBUMS_TABLE)?;
        clear_table(&write_txn, ARTISTS_TABLE)?;
        clear_table(&write_txn, EXTERNAL_ATTEMPTS_TABLE)?;
        {
            let mut meta_table = write_txn.open_table(META_TABLE)?;
            let version_bytes = encode_value(&CATALOG_VERSION)?;
            meta_table.insert(META_VERSION_KEY, version_bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_all<R: Record>(&self) -> Result<Vec<R>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(R::TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut items = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            items.push(decode_value(entry.1.value())?);
        }
        Ok(items)
    }

    pub fn get<R: Record>(&self, key: &str) -> Result<Option<R>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(R::TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = match table.get(key)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn insert_one<R: Record>(&self, record: &R) -> Result<(), LibraryError> {
        self.insert_many(std::slice::from_ref(record))?;
        Ok(())
    }

    /// Writes all records in one transaction. Returns how many keys were new.
    pub fn insert_many<R: Record>(&self, records: &[R]) -> Result<usize, LibraryError> {
        if records.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write()?;
        let inserted = insert_records(&write_txn, records)?;
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Applies `update` to the stored record. The update must not change the key.
    pub fn update_by_key<R: Record, F: FnOnce(&mut R)>(
        &self,
        key: &str,
        update: F,
    ) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(R::TABLE)?;
            let mut record: R = match table.get(key)? {
                Some(value) => decode_value(value.value())?,
                None => return Ok(false),
            };
            update(&mut record);
            let bytes = encode_value(&record)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    pub fn delete_by_keys<R: Record>(&self, keys: &[String]) -> Result<usize, LibraryError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(R::TABLE)?;
            let mut removed = 0usize;
            for key in keys {
                if table.remove(key.as_str())?.is_some() {
                    removed += 1;
                }
            }
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Commits the output of one tag ingestion pass as a single transaction.
    pub fn commit_batch(
        &self,
        tracks: &[Track],
        albums: &[Album],
        artists: &[Artist],
    ) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        insert_records(&write_txn, tracks)?;
        insert_records(&write_txn, albums)?;
        insert_records(&write_txn, artists)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn favorite_track_hashes(&self) -> Result<HashSet<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(FAVORITES_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(HashSet::new()),
            Err(err) => return Err(err.into()),
        };
        let mut hashes = HashSet::new();
        for entry in table.iter()? {
            let entry = entry?;
            hashes.insert(entry.0.value().to_string());
        }
        Ok(hashes)
    }

    #[cfg(test)]
    pub(crate) fn set_favorite(&self, trackhash: &str, favorite: bool) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FAVORITES_TABLE)?;
            if favorite {
                let stamp = encode_value(&now_secs())?;
                table.insert(trackhash, stamp.as_slice())?;
            } else {
                table.remove(trackhash)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn should_attempt_external(
        &self,
        key: &str,
        min_interval: Duration,
    ) -> Result<bool, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(EXTERNAL_ATTEMPTS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(true),
            Err(err) => return Err(err.into()),
        };
        let attempt = match table.get(key)? {
            Some(value) => decode_value::<ExternalAttempt>(value.value())?,
            None => return Ok(true),
        };
        let now = now_secs();
        Ok(now.saturating_sub(attempt.last_attempt) >= min_interval.as_secs())
    }

    pub fn record_external_attempt(&self, key: &str, success: bool) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EXTERNAL_ATTEMPTS_TABLE)?;
            let now = now_secs();
            let mut record = match table.get(key)? {
                Some(value) => decode_value::<ExternalAttempt>(value.value())?,
                None => ExternalAttempt {
                    last_attempt: now,
                    last_success: None,
                },
            };
            record.last_attempt = now;
            if success {
                record.last_success = Some(now);
            }
            let bytes = encode_value(&record)?;
            table.insert(key, bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

fn insert_records<R: Record>(txn: &WriteTransaction, records: &[R]) -> Result<usize, LibraryError> {
    if records.is_empty() {
        return Ok(0);
    }
    let mut table = txn.open_table(R::TABLE)?;
    let mut inserted = 0usize;
    for record in records {
        let bytes = encode_value(record)?;
        if table.insert(record.key(), bytes.as_slice())?.is_none() {
            inserted += 1;
        }
    }
    Ok(inserted)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
