//! Lightweight key/value settings area backing the state store

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::constants::store::TEMP_FILE_SUFFIX;
use crate::errors::{StoreError, StoreResult};

/// Durable storage for JSON values under well-known keys
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    async fn load(&self, key: &str) -> StoreResult<Option<Value>>;
    async fn save(&self, key: &str, value: Value) -> StoreResult<()>;
}

/// One JSON object on disk, rewritten atomically on every save
pub struct FileSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StoreResult<Map<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn write_document(&self, document: &Map<String, Value>) -> StoreResult<()> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let bytes = serde_json::to_vec_pretty(document)?;
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(TEMP_FILE_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        tokio::fs::write(&temp_path, &bytes).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsBackend for FileSettings {
    async fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    async fn save(&self, key: &str, value: Value) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value);
        self.write_document(&document).await
    }
}

/// In-process settings, counting writes so callers can observe persistence cadence
#[derive(Default)]
pub struct MemorySettings {
    values: parking_lot::Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Last value saved under `key`
    pub fn value(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl SettingsBackend for MemorySettings {
    async fn load(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.value(key))
    }

    async fn save(&self, key: &str, value: Value) -> StoreResult<()> {
        self.values.lock().insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
