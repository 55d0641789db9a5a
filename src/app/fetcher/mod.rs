//! Icon fetching with bounded retries and batched persistence
//!
//! Each `fetch` runs on its own task and competes for a small semaphore.
//! Failures are retried after a fixed delay up to `max_attempts`, then dropped
//! with a log line. Successful payloads wait in memory until either the cache
//! reaches `flush_threshold` or no new payload has arrived for `flush_delay`,
//! and are then written to the [`IconSink`] in one batch.

pub mod config;
pub mod source;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::catalog::IconSink;
use crate::app::models::CatalogEntry;
use crate::errors::CatalogResult;

pub use config::IconFetcherConfig;
pub use source::{HttpIconSource, IconSource};

struct Inner {
    config: IconFetcherConfig,
    source: Arc<dyn IconSource>,
    sink: Arc<dyn IconSink>,
    permits: Semaphore,
    cache: Mutex<HashMap<String, Vec<u8>>>,
    flush_lock: tokio::sync::Mutex<()>,
}

/// Concurrent icon downloader; clones share one cache
#[derive(Clone)]
pub struct IconFetcher {
    inner: Arc<Inner>,
}

impl IconFetcher {
    pub fn new(
        config: IconFetcherConfig,
        source: Arc<dyn IconSource>,
        sink: Arc<dyn IconSink>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                source,
                sink,
                permits,
                cache: Mutex::new(HashMap::new()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Fetch one icon in the background
    ///
    /// The task resolves to whether the icon reached the cache.
    pub fn fetch(&self, identifier: &str, url: Url) -> JoinHandle<bool> {
        let inner = self.inner.clone();
        let identifier = identifier.to_string();
        tokio::spawn(async move { inner.fetch_with_retries(identifier, url).await })
    }

    /// Fetch every entry that has an icon URL but no icon, then flush
    ///
    /// Returns the number of icons fetched.
    pub async fn fetch_missing(&self, entries: Vec<CatalogEntry>) -> usize {
        let mut handles = Vec::new();
        for entry in entries.into_iter().filter(CatalogEntry::needs_icon) {
            let Some(raw) = entry.icon_url.as_deref() else {
                continue;
            };
            match Url::parse(raw) {
                Ok(url) => handles.push(self.fetch(&entry.identifier, url)),
                Err(e) => warn!("Skipping icon of {}: invalid URL {}: {}", entry.identifier, raw, e),
            }
        }

        let mut fetched = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => fetched += 1,
                Ok(false) => {}
                Err(e) => warn!("Icon task failed: {}", e),
            }
        }

        if let Err(e) = self.flush().await {
            warn!("Could not store icons: {}", e);
        }
        fetched
    }

    /// Write whatever is cached now; returns the number of icons written
    pub async fn flush(&self) -> CatalogResult<usize> {
        self.inner.flush().await
    }

    /// Icons fetched but not yet written
    pub fn pending(&self) -> usize {
        self.inner.cache.lock().len()
    }
}

impl Inner {
    async fn fetch_with_retries(self: Arc<Self>, identifier: String, url: Url) -> bool {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return false;
                };
                self.source.fetch(&url).await
            };

            match result {
                Ok(bytes) => {
                    debug!("Fetched icon of {} ({} bytes)", identifier, bytes.len());
                    self.cache_icon(identifier, bytes).await;
                    return true;
                }
                Err(e) if attempt < max_attempts => {
                    debug!(
                        "Icon of {} failed (attempt {}/{}): {}",
                        identifier, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        "Dropping icon of {} after {} attempts: {}",
                        identifier, max_attempts, e
                    );
                }
            }
        }
        false
    }

    async fn cache_icon(self: &Arc<Self>, identifier: String, bytes: Vec<u8>) {
        let (size, keys) = {
            let mut cache = self.cache.lock();
            cache.insert(identifier, bytes);
            (cache.len(), key_set(&cache))
        };

        if size >= self.config.flush_threshold {
            if let Err(e) = self.flush().await {
                warn!("Could not store icons: {}", e);
            }
            return;
        }

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.flush_delay).await;
            let unchanged = key_set(&inner.cache.lock()) == keys;
            if unchanged && !keys.is_empty() {
                if let Err(e) = inner.flush().await {
                    warn!("Could not store icons: {}", e);
                }
            }
        });
    }

    async fn flush(&self) -> CatalogResult<usize> {
        let _guard = self.flush_lock.lock().await;
        let batch = std::mem::take(&mut *self.cache.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        let keys = batch.keys().cloned().collect::<Vec<_>>();
        match self.sink.store_icons(batch.clone()).await {
            Ok(()) => {
                info!("Flushed {} icons", count);
                Ok(count)
            }
            Err(e) => {
                // Keep the payloads for the next flush unless newer ones arrived
                let mut cache = self.cache.lock();
                for (identifier, bytes) in batch {
                    cache.entry(identifier).or_insert(bytes);
                }
                debug!("Requeued icons of {:?}", keys);
                Err(e)
            }
        }
    }
}

fn key_set(cache: &HashMap<String, Vec<u8>>) -> BTreeSet<String> {
    cache.keys().cloned().collect()
}
