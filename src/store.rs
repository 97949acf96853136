//! Persisted side-tables
//!
//! Favorites, transfer history and the call log are plain JSON arrays on
//! disk. History tables are bounded to most-recent-N; writes happen
//! synchronously with the outcome they record so records cannot be lost to a
//! following event.

use std::path::{Path, PathBuf};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use chrono::Utc;

use crate::models::{CallLogRecord, FavoriteEntry, TransferRecord};

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One JSON-array file.
struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn load<T: DeserializeOwned>(&self) -> StoreResult<Vec<T>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save<T: Serialize>(&self, items: &[T]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(items)?;
        fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

/// Append-only, size-bounded transfer history.
pub struct TransferHistory {
    store: JsonStore,
    limit: usize,
    records: RwLock<Vec<TransferRecord>>,
}

impl TransferHistory {
    pub async fn open(data_dir: &Path, limit: usize) -> StoreResult<Self> {
        let store = JsonStore::new(data_dir.join("transfer_history.json"));
        let records = store.load().await?;
        Ok(Self {
            store,
            limit,
            records: RwLock::new(records),
        })
    }

    /// Append a record and persist before returning.
    pub async fn append(&self, record: TransferRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records.push(record);
        let len = records.len();
        if len > self.limit {
            records.drain(0..len - self.limit);
        }
        self.store.save(&records).await
    }

    /// Most recent first.
    pub async fn recent(&self) -> Vec<TransferRecord> {
        let records = self.records.read().await;
        records.iter().rev().cloned().collect()
    }
}

/// Append-only, size-bounded call log.
pub struct CallLog {
    store: JsonStore,
    limit: usize,
    records: RwLock<Vec<CallLogRecord>>,
}

impl CallLog {
    pub async fn open(data_dir: &Path, limit: usize) -> StoreResult<Self> {
        let store = JsonStore::new(data_dir.join("call_log.json"));
        let records = store.load().await?;
        Ok(Self {
            store,
            limit,
            records: RwLock::new(records),
        })
    }

    pub async fn append(&self, record: CallLogRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records.push(record);
        let len = records.len();
        if len > self.limit {
            records.drain(0..len - self.limit);
        }
        self.store.save(&records).await
    }

    pub async fn recent(&self) -> Vec<CallLogRecord> {
        let records = self.records.read().await;
        records.iter().rev().cloned().collect()
    }
}

/// Pinned transfer targets, keyed by extension.
pub struct Favorites {
    store: JsonStore,
    entries: RwLock<Vec<FavoriteEntry>>,
}

impl Favorites {
    pub async fn open(data_dir: &Path) -> StoreResult<Self> {
        let store = JsonStore::new(data_dir.join("favorites.json"));
        let entries = store.load().await?;
        Ok(Self {
            store,
            entries: RwLock::new(entries),
        })
    }

    /// Add or rename a favorite. Adding an existing extension updates its
    /// name in place.
    pub async fn add(&self, extension: &str, name: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.iter_mut().find(|e| e.extension == extension) {
            existing.name = name.to_string();
        } else {
            entries.push(FavoriteEntry {
                extension: extension.to_string(),
                name: name.to_string(),
                added_at: Utc::now(),
            });
        }
        self.store.save(&entries).await
    }

    pub async fn remove(&self, extension: &str) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.extension != extension);
        let removed = entries.len() != before;
        if removed {
            self.store.save(&entries).await?;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<FavoriteEntry> {
        self.entries.read().await.clone()
    }
}
