//! Catalog collaborator
//!
//! The transfer engine only needs to look entries up; the icon fetcher also
//! writes icon bytes back onto them. `JsonCatalog` is a small file-backed
//! implementation used by the command line tool and the tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::app::models::CatalogEntry;
use crate::constants::store::TEMP_FILE_SUFFIX;
use crate::errors::CatalogResult;

/// Read access to catalog entries
pub trait Catalog: Send + Sync {
    fn entry(&self, identifier: &str) -> Option<CatalogEntry>;
}

/// Durable destination for fetched icons
#[async_trait]
pub trait IconSink: Send + Sync {
    /// Write every payload onto its catalog entry in one batch
    async fn store_icons(&self, icons: HashMap<String, Vec<u8>>) -> CatalogResult<()>;
}

/// Catalog kept as a JSON array of entries
pub struct JsonCatalog {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
    save_lock: Mutex<()>,
}

impl JsonCatalog {
    /// Load the catalog at `path`; a missing file yields an empty catalog
    pub async fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<CatalogEntry> = serde_json::from_slice(&bytes)?;
                debug!("Loaded {} catalog entries from {}", list.len(), path.display());
                list.into_iter()
                    .map(|entry| (entry.identifier.clone(), entry))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            save_lock: Mutex::new(()),
        })
    }

    /// Catalog that never touches disk
    pub fn in_memory(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            path: None,
            entries: RwLock::new(
                entries
                    .into_iter()
                    .map(|entry| (entry.identifier.clone(), entry))
                    .collect(),
            ),
            save_lock: Mutex::new(()),
        }
    }

    /// Add or replace an entry; icon bytes already cached are kept
    pub fn insert(&self, mut entry: CatalogEntry) {
        let mut entries = self.entries.write();
        if entry.icon.is_none() {
            if let Some(existing) = entries.get(&entry.identifier) {
                if existing.icon_url == entry.icon_url {
                    entry.icon = existing.icon.clone();
                }
            }
        }
        entries.insert(entry.identifier.clone(), entry);
    }

    pub fn remove(&self, identifier: &str) -> Option<CatalogEntry> {
        self.entries.write().remove(identifier)
    }

    /// All entries ordered by identifier
    pub fn list(&self) -> Vec<CatalogEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Entries with an icon URL but no cached icon
    pub fn missing_icons(&self) -> Vec<CatalogEntry> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.needs_icon())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Write the catalog back to its file using temp-file-and-rename
    pub async fn save(&self) -> CatalogResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;
        let bytes = serde_json::to_vec_pretty(&self.list())?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_extension(format!("json{}", TEMP_FILE_SUFFIX));
        tokio::fs::write(&temp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Saved catalog to {}", path.display());
        Ok(())
    }
}

impl Catalog for JsonCatalog {
    fn entry(&self, identifier: &str) -> Option<CatalogEntry> {
        self.entries.read().get(identifier).cloned()
    }
}

#[async_trait]
impl IconSink for JsonCatalog {
    async fn store_icons(&self, icons: HashMap<String, Vec<u8>>) -> CatalogResult<()> {
        let count = icons.len();
        {
            let mut entries = self.entries.write();
            for (identifier, bytes) in icons {
                match entries.get_mut(&identifier) {
                    Some(entry) => entry.icon = Some(bytes),
                    None => warn!("Dropping icon for {}: no longer in catalog", identifier),
                }
            }
        }
        self.save().await?;
        info!("Stored {} icons", count);
        Ok(())
    }
}
