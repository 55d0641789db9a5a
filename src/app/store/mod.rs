//! Durable per-item download state
//!
//! The store keeps every [`DownloadRecord`] in memory, publishes the whole map
//! on a `watch` channel after each change, and writes the map as one document
//! under [`DOWNLOAD_STATES_KEY`].
//!
//! Progress updates only mark the store dirty; the heartbeat task calls
//! [`StateStore::flush_if_dirty`] on a fixed cadence. Token, error, creation and
//! removal changes are written immediately.

pub mod record;
pub mod settings;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, warn};

use crate::app::models::ResumeToken;
use crate::constants::DOWNLOAD_STATES_KEY;
use crate::errors::{StoreError, StoreResult};

pub use record::DownloadRecord;
use record::PersistedRecord;
pub use settings::{FileSettings, MemorySettings, SettingsBackend};

/// Snapshot of all records keyed by identifier
pub type RecordMap = HashMap<String, DownloadRecord>;

pub struct StateStore {
    records: Mutex<RecordMap>,
    projection: watch::Sender<RecordMap>,
    backend: Arc<dyn SettingsBackend>,
    dirty: AtomicBool,
}

impl StateStore {
    /// Load persisted records from `backend`
    ///
    /// A corrupted document is logged and replaced by an empty map; I/O
    /// failures are returned.
    pub async fn open(backend: Arc<dyn SettingsBackend>) -> StoreResult<Self> {
        let records = match backend.load(DOWNLOAD_STATES_KEY).await {
            Ok(Some(value)) => decode(value).unwrap_or_else(|e| {
                warn!("Discarding unreadable download states: {}", e);
                RecordMap::new()
            }),
            Ok(None) => RecordMap::new(),
            Err(StoreError::Corrupted(e)) => {
                warn!("Settings document is corrupted, starting empty: {}", e);
                RecordMap::new()
            }
            Err(e) => return Err(e),
        };

        debug!("Restored {} download records", records.len());
        let (projection, _) = watch::channel(records.clone());

        Ok(Self {
            records: Mutex::new(records),
            projection,
            backend,
            dirty: AtomicBool::new(false),
        })
    }

    /// Empty store backed by [`MemorySettings`]
    pub fn in_memory() -> Self {
        let (projection, _) = watch::channel(RecordMap::new());
        Self {
            records: Mutex::new(RecordMap::new()),
            projection,
            backend: Arc::new(MemorySettings::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub async fn get(&self, identifier: &str) -> Option<DownloadRecord> {
        self.records.lock().await.get(identifier).cloned()
    }

    /// Replace any existing record with a fresh zero-progress one
    pub async fn create(&self, identifier: &str, bytes_expected: u64) -> DownloadRecord {
        let mut records = self.records.lock().await;
        let record = DownloadRecord::new(identifier, bytes_expected);
        records.insert(identifier.to_string(), record.clone());
        self.commit(&records, true).await;
        record
    }

    /// Record progress, creating the record if needed
    ///
    /// Only marks the store dirty; the next heartbeat persists it.
    pub async fn upsert(&self, identifier: &str, bytes_downloaded: u64, bytes_expected: u64) {
        let mut records = self.records.lock().await;
        records
            .entry(identifier.to_string())
            .or_insert_with(|| DownloadRecord::new(identifier, 0))
            .set_progress(bytes_downloaded, bytes_expected);
        self.commit(&records, false).await;
    }

    pub async fn set_resume_token(&self, identifier: &str, token: ResumeToken) -> bool {
        self.modify(identifier, |record| record.resume_token = Some(token))
            .await
    }

    pub async fn clear_resume_token(&self, identifier: &str) -> bool {
        self.modify(identifier, |record| record.resume_token = None)
            .await
    }

    /// Remove and return the stored token
    pub async fn take_resume_token(&self, identifier: &str) -> Option<ResumeToken> {
        let mut records = self.records.lock().await;
        let token = records.get_mut(identifier)?.resume_token.take();
        if token.is_some() {
            self.commit(&records, true).await;
        }
        token
    }

    pub async fn set_error(&self, identifier: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        self.modify(identifier, |record| record.last_error = Some(message))
            .await
    }

    pub async fn clear_error(&self, identifier: &str) -> bool {
        self.modify(identifier, |record| record.last_error = None)
            .await
    }

    /// Apply an arbitrary change and persist it; returns false if the record is missing
    pub async fn modify<F>(&self, identifier: &str, change: F) -> bool
    where
        F: FnOnce(&mut DownloadRecord),
    {
        let mut records = self.records.lock().await;
        let Some(record) = records.get_mut(identifier) else {
            debug!("No download record for {}", identifier);
            return false;
        };
        change(record);
        self.commit(&records, true).await;
        true
    }

    pub async fn remove(&self, identifier: &str) -> Option<DownloadRecord> {
        let mut records = self.records.lock().await;
        let removed = records.remove(identifier);
        if removed.is_some() {
            self.commit(&records, true).await;
        }
        removed
    }

    pub async fn snapshot_all(&self) -> RecordMap {
        self.records.lock().await.clone()
    }

    /// Current-value stream of every record
    pub fn subscribe(&self) -> watch::Receiver<RecordMap> {
        self.projection.subscribe()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Write the whole map now
    pub async fn flush(&self) -> StoreResult<()> {
        let records = self.records.lock().await;
        self.write(&records).await
    }

    /// Write the map if progress changed since the last write
    pub async fn flush_if_dirty(&self) -> StoreResult<bool> {
        let records = self.records.lock().await;
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }

    /// Publish the new map and optionally persist it
    async fn commit(&self, records: &RecordMap, persist: bool) {
        self.projection.send_if_modified(|current| {
            if *current == *records {
                false
            } else {
                *current = records.clone();
                true
            }
        });

        if persist {
            if let Err(e) = self.write(records).await {
                error!("Failed to persist download states: {}", e);
            }
        } else {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    async fn write(&self, records: &RecordMap) -> StoreResult<()> {
        let result = self
            .backend
            .save(DOWNLOAD_STATES_KEY, encode(records)?)
            .await;
        // A failed write leaves the store dirty so the heartbeat retries it
        self.dirty.store(result.is_err(), Ordering::SeqCst);
        result
    }
}

fn encode(records: &RecordMap) -> StoreResult<Value> {
    let persisted: HashMap<&str, PersistedRecord> = records
        .iter()
        .map(|(id, record)| (id.as_str(), PersistedRecord::from_record(record)))
        .collect();
    Ok(serde_json::to_value(persisted)?)
}

fn decode(value: Value) -> StoreResult<RecordMap> {
    let persisted: HashMap<String, PersistedRecord> = serde_json::from_value(value)?;
    Ok(persisted
        .into_iter()
        .map(|(id, record)| (id.clone(), record.into_record(id)))
        .collect())
}
