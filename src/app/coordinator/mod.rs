//! Transfer coordination
//!
//! The [`TransferCoordinator`] turns `start`/`pause`/`resume`/`cancel` intents
//! into transport calls and reconciles transport events into the
//! [`StateStore`](crate::app::store::StateStore).
//!
//! # Coordination discipline
//!
//! The table of active attempts sits behind one async mutex. Every operation
//! and every transport event takes that lock before touching the store, so
//! record mutations never interleave. Events arrive through a single FIFO
//! channel drained by the event loop in [`background_tasks`], which keeps the
//! transport's per-transfer ordering: queued progress is applied before the
//! terminal event, and anything after the terminal event is ignored because
//! the attempt is no longer in the table.
//!
//! # Components
//!
//! - [`config`] - Configuration structures and validation
//! - [`handle`] - Progress stream and terminal result returned to callers
//! - [`reconcile`] - Classification of completion events
//! - [`completion`] - Relocation and notification hooks
//! - [`progress`] - Remaining-time estimation
//! - [`background_tasks`] - Event loop and persistence heartbeat
//! - [`signals`] - Ctrl-C and SIGTERM handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use url::Url;
//! use zim_fetcher::app::{
//!     BackgroundTaskManager, CatalogEntry, CompletionHooks, CoordinatorConfig, HttpTransport,
//!     JsonCatalog, LoggingContentStore, LoggingNotifier, StateStore, TransferCoordinator,
//!     TransportConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(JsonCatalog::in_memory(vec![CatalogEntry::new(
//!     "wiki_en",
//!     "https://download.kiwix.org/zim/wikipedia_en.zim.meta4",
//!     1_000_000,
//! )]));
//! let store = Arc::new(StateStore::in_memory());
//! let (events_tx, events_rx) = mpsc::channel(1024);
//! let transport = Arc::new(HttpTransport::new(TransportConfig::new("partial"), events_tx)?);
//! let config = CoordinatorConfig::default();
//! let hooks = CompletionHooks::new(
//!     &config.content_dir,
//!     Arc::new(LoggingContentStore),
//!     Arc::new(LoggingNotifier),
//! );
//! let coordinator = Arc::new(TransferCoordinator::new(config, catalog, store.clone(), transport, hooks));
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let mut tasks = BackgroundTaskManager::new();
//! tasks.start_event_loop(coordinator.clone(), events_rx, shutdown_tx.subscribe());
//! tasks.start_heartbeat(store, std::time::Duration::from_secs(1), shutdown_tx.subscribe());
//!
//! let url = Url::parse("https://download.kiwix.org/zim/wikipedia_en.zim.meta4")?;
//! let handle = coordinator.start("wiki_en", &url, true).await?;
//! println!("{:?}", handle.wait().await);
//! # Ok(())
//! # }
//! ```

pub mod background_tasks;
pub mod completion;
pub mod config;
pub mod handle;
pub mod progress;
pub mod reconcile;
pub mod signals;

#[cfg(test)]
pub mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::catalog::Catalog;
use crate::app::models::TransferRequest;
use crate::app::reachability::ReachabilityState;
use crate::app::status::{DisplayState, ItemStatus};
use crate::app::store::record::clamp_expected;
use crate::app::store::StateStore;
use crate::app::transport::{TaskId, TransferCompletion, Transport, TransportEvent};
use crate::errors::{DownloadError, DownloadResult};

pub use background_tasks::BackgroundTaskManager;
pub use completion::{CompletionHooks, ContentStore, LoggingContentStore, LoggingNotifier, Notifier};
pub use config::CoordinatorConfig;
pub use handle::{ProgressEvents, TransferHandle, TransferOutcome, TransferProgress, TransferResult};
pub use progress::EtaEstimator;
pub use reconcile::Resolution;

use handle::{subscription, Subscriber};
use reconcile::rejection_message;

/// Error stored on records whose transfer vanished with the previous process
pub const INTERRUPTED_MESSAGE: &str = "Transfer was interrupted";

/// Bookkeeping for one running attempt
struct ActiveTransfer {
    task: TaskId,
    /// Set by `pause()`, resolved by the matching acknowledgement or completion
    pending_pause: bool,
    subscriber: Option<Subscriber>,
    eta: EtaEstimator,
}

impl ActiveTransfer {
    fn new(task: TaskId, subscriber: Option<Subscriber>) -> Self {
        Self {
            task,
            pending_pause: false,
            subscriber,
            eta: EtaEstimator::new(),
        }
    }

    fn report(&mut self, bytes_downloaded: u64, bytes_expected: u64) {
        let Some(subscriber) = &self.subscriber else {
            return;
        };
        let now = Instant::now();
        self.eta.add_sample(bytes_downloaded, now);
        subscriber.progress(TransferProgress {
            bytes_downloaded,
            bytes_expected,
            remaining: self.eta.remaining(bytes_expected, now),
        });
    }

    fn finish(self, outcome: TransferOutcome) {
        if let Some(subscriber) = self.subscriber {
            subscriber.finish(outcome);
        }
    }
}

/// Owner of all transfer state transitions
pub struct TransferCoordinator {
    config: CoordinatorConfig,
    catalog: Arc<dyn Catalog>,
    store: Arc<StateStore>,
    transport: Arc<dyn Transport>,
    hooks: CompletionHooks,
    reachability: Option<watch::Receiver<ReachabilityState>>,
    active: Mutex<HashMap<String, ActiveTransfer>>,
}

impl TransferCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        catalog: Arc<dyn Catalog>,
        store: Arc<StateStore>,
        transport: Arc<dyn Transport>,
        hooks: CompletionHooks,
    ) -> Self {
        Self {
            config,
            catalog,
            store,
            transport,
            hooks,
            reachability: None,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Use a reachability signal when explaining paused or stalled items
    pub fn with_reachability(mut self, reachability: watch::Receiver<ReachabilityState>) -> Self {
        self.reachability = Some(reachability);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Begin a fresh transfer of a catalog item
    ///
    /// Any earlier progress, error or resume token for the item is discarded.
    ///
    /// # Errors
    ///
    /// `UnknownItem` if the catalog lacks the identifier, `AlreadyActive` if
    /// it is already transferring. Both are logged and leave state untouched.
    pub async fn start(
        &self,
        identifier: &str,
        source_url: &Url,
        allow_metered: bool,
    ) -> DownloadResult<TransferHandle> {
        let Some(entry) = self.catalog.entry(identifier) else {
            warn!("Ignoring start of {}: not in catalog", identifier);
            return Err(DownloadError::UnknownItem {
                identifier: identifier.to_string(),
            });
        };

        let mut active = self.active.lock().await;
        if active.contains_key(identifier) {
            warn!("Ignoring start of {}: already transferring", identifier);
            return Err(DownloadError::AlreadyActive {
                identifier: identifier.to_string(),
            });
        }

        if let Some(token) = self
            .store
            .get(identifier)
            .await
            .and_then(|record| record.resume_token)
        {
            self.transport.discard(&token);
        }
        self.store.create(identifier, entry.expected_size).await;
        self.hooks.notifier().request_permission();

        let request = TransferRequest::new(identifier, source_url, entry.expected_size)
            .with_allow_metered(allow_metered && self.config.allow_metered);
        let task = match self.transport.start(request) {
            Ok(task) => task,
            Err(e) => {
                warn!("Transport refused {}: {}", identifier, e);
                self.store.remove(identifier).await;
                return Err(e);
            }
        };

        let (subscriber, handle) = subscription(identifier);
        active.insert(
            identifier.to_string(),
            ActiveTransfer::new(task, Some(subscriber)),
        );
        info!("Started {} as {}", identifier, task);
        Ok(handle)
    }

    /// Ask the transport to stop while keeping the bytes
    ///
    /// Returns whether a pause was requested. Nothing happens when no transfer
    /// is active or a pause is already pending.
    pub async fn pause(&self, identifier: &str) -> bool {
        let mut active = self.active.lock().await;
        match active.get_mut(identifier) {
            Some(transfer) if transfer.pending_pause => {
                debug!("Pause of {} already pending", identifier);
                false
            }
            Some(transfer) => {
                transfer.pending_pause = true;
                self.transport.pause(transfer.task);
                info!("Pausing {}", identifier);
                true
            }
            None => {
                debug!("Ignoring pause of {}: not transferring", identifier);
                false
            }
        }
    }

    /// Continue a paused transfer from its stored token
    ///
    /// # Errors
    ///
    /// `NotPaused` when no token is stored; a fresh `start` is required then.
    /// Transport errors leave the token in place.
    pub async fn resume(&self, identifier: &str) -> DownloadResult<TransferHandle> {
        let mut active = self.active.lock().await;
        if active.contains_key(identifier) {
            warn!("Ignoring resume of {}: already transferring", identifier);
            return Err(DownloadError::AlreadyActive {
                identifier: identifier.to_string(),
            });
        }

        let Some(token) = self
            .store
            .get(identifier)
            .await
            .and_then(|record| record.resume_token)
        else {
            warn!("Cannot resume {}: no resume token", identifier);
            return Err(DownloadError::NotPaused {
                identifier: identifier.to_string(),
            });
        };

        self.store
            .modify(identifier, |record| {
                record.resume_token = None;
                record.last_error = None;
            })
            .await;

        let task = match self.transport.resume(identifier, &token) {
            Ok(task) => task,
            Err(e) => {
                warn!("Transport could not resume {}: {}", identifier, e);
                self.store.set_resume_token(identifier, token).await;
                return Err(e);
            }
        };

        let (subscriber, handle) = subscription(identifier);
        active.insert(
            identifier.to_string(),
            ActiveTransfer::new(task, Some(subscriber)),
        );
        info!("Resumed {} as {}", identifier, task);
        Ok(handle)
    }

    /// Stop the transfer, drop partial data and forget the record
    ///
    /// The record disappears immediately; transport cleanup happens later.
    pub async fn cancel(&self, identifier: &str) {
        let mut active = self.active.lock().await;
        if let Some(transfer) = active.remove(identifier) {
            self.transport.cancel(transfer.task);
            transfer.finish(TransferOutcome::Cancelled);
        } else if let Some(token) = self
            .store
            .get(identifier)
            .await
            .and_then(|record| record.resume_token)
        {
            self.transport.discard(&token);
        }

        if self.store.remove(identifier).await.is_some() {
            info!("Cancelled {}", identifier);
        } else {
            debug!("Cancel of {}: no record", identifier);
        }
    }

    /// Reattach transfers the transport is still running and recover records
    /// whose transfer was lost with the previous process
    ///
    /// Returns the number of reattached transfers.
    pub async fn restart_monitoring_if_needed(&self) -> usize {
        let mut active = self.active.lock().await;

        let mut reattached = 0;
        for snapshot in self.transport.tasks() {
            if active.contains_key(&snapshot.identifier) {
                continue;
            }
            let expected = match snapshot.bytes_expected {
                Some(expected) => expected,
                None => self
                    .store
                    .get(&snapshot.identifier)
                    .await
                    .map(|record| record.bytes_expected)
                    .unwrap_or(0),
            };
            self.store
                .upsert(&snapshot.identifier, snapshot.bytes_written, expected)
                .await;
            active.insert(
                snapshot.identifier.clone(),
                ActiveTransfer::new(snapshot.task, None),
            );
            debug!("Reattached {} to {}", snapshot.identifier, snapshot.task);
            reattached += 1;
        }

        for (identifier, record) in self.store.snapshot_all().await {
            if active.contains_key(&identifier)
                || record.resume_token.is_some()
                || record.last_error.is_some()
            {
                continue;
            }

            let request = self.catalog.entry(&identifier).and_then(|entry| {
                let url = entry.url().ok()?;
                Some(TransferRequest::new(&identifier, &url, entry.expected_size))
            });
            let Some(request) = request else {
                info!("Dropping record of {}: no longer in catalog", identifier);
                self.store.remove(&identifier).await;
                continue;
            };

            match self.transport.salvage(&request) {
                Some(token) => {
                    info!("Recovered partial transfer of {}", identifier);
                    self.store.set_resume_token(&identifier, token).await;
                }
                None => {
                    info!("Transfer of {} was lost; a fresh start is needed", identifier);
                    self.store.set_error(&identifier, INTERRUPTED_MESSAGE).await;
                }
            }
        }

        if reattached > 0 {
            info!("Reattached {} running transfers", reattached);
        }
        reattached
    }

    /// Apply one transport event
    ///
    /// Events for attempts that are no longer active are ignored.
    pub async fn handle_event(&self, event: TransportEvent) {
        let mut active = self.active.lock().await;
        let identifier = event.identifier().to_string();
        match active.get(&identifier) {
            Some(transfer) if transfer.task == event.task() => {}
            _ => {
                debug!("Ignoring event for inactive {} ({})", identifier, event.task());
                return;
            }
        }

        match event {
            TransportEvent::Progress {
                bytes_written,
                bytes_expected,
                ..
            } => {
                let expected = match bytes_expected {
                    Some(expected) => expected,
                    None => self
                        .store
                        .get(&identifier)
                        .await
                        .map(|record| record.bytes_expected)
                        .unwrap_or(0),
                };
                self.store.upsert(&identifier, bytes_written, expected).await;
                if let Some(transfer) = active.get_mut(&identifier) {
                    transfer.report(bytes_written, clamp_expected(bytes_written, expected));
                }
            }
            TransportEvent::Paused {
                bytes_written,
                resume_data,
                ..
            } => {
                let Some(transfer) = active.get_mut(&identifier) else {
                    return;
                };
                if !transfer.pending_pause {
                    debug!("Ignoring unsolicited pause acknowledgement for {}", identifier);
                    return;
                }
                match resume_data {
                    Some(token) => {
                        // The last progress event may lag behind what the token resumes from
                        self.store
                            .modify(&identifier, |record| {
                                let expected = record.bytes_expected;
                                record.set_progress(bytes_written, expected);
                                record.resume_token = Some(token);
                            })
                            .await;
                        if let Some(transfer) = active.remove(&identifier) {
                            transfer.finish(TransferOutcome::Paused);
                        }
                        info!("Paused {}", identifier);
                    }
                    None => {
                        transfer.pending_pause = false;
                        warn!("{} cannot be paused; transfer continues", identifier);
                    }
                }
            }
            TransportEvent::Completed { completion, .. } => {
                if let Some(transfer) = active.remove(&identifier) {
                    let outcome = self
                        .complete(&identifier, completion, transfer.pending_pause)
                        .await;
                    transfer.finish(outcome);
                }
            }
        }
    }

    async fn complete(
        &self,
        identifier: &str,
        completion: TransferCompletion,
        pending_pause: bool,
    ) -> TransferOutcome {
        match reconcile::classify(completion, pending_pause) {
            Resolution::Succeeded { file } => {
                let title = self
                    .catalog
                    .entry(identifier)
                    .map(|entry| entry.title().to_string())
                    .unwrap_or_else(|| identifier.to_string());
                let path = self.hooks.succeeded(identifier, &title, file.as_ref()).await;
                self.store.remove(identifier).await;
                info!("Completed {}", identifier);
                TransferOutcome::Completed { path }
            }
            Resolution::Rejected { status } => {
                let message = rejection_message(status);
                warn!("{} rejected: {}", identifier, message);
                self.store.remove(identifier).await;
                self.hooks.failed(identifier, &message);
                TransferOutcome::Failed { message }
            }
            Resolution::PauseConfirmed { resume_data } => {
                let missing = self
                    .store
                    .get(identifier)
                    .await
                    .is_some_and(|record| record.resume_token.is_none());
                if missing {
                    self.store.set_resume_token(identifier, resume_data).await;
                }
                info!("Paused {}", identifier);
                TransferOutcome::Paused
            }
            Resolution::Interrupted {
                resume_data,
                message,
            } => {
                warn!("{} interrupted: {}", identifier, message);
                let stored = message.clone();
                self.store
                    .modify(identifier, |record| {
                        record.resume_token = Some(resume_data);
                        record.last_error = Some(stored);
                    })
                    .await;
                TransferOutcome::Interrupted { message }
            }
            Resolution::Failed { message } => {
                warn!("{} failed: {}", identifier, message);
                let stored = message.clone();
                self.store
                    .modify(identifier, |record| {
                        record.resume_token = None;
                        record.last_error = Some(stored);
                    })
                    .await;
                self.hooks.failed(identifier, &message);
                TransferOutcome::Failed { message }
            }
        }
    }

    pub async fn is_active(&self, identifier: &str) -> bool {
        self.active.lock().await.contains_key(identifier)
    }

    fn network(&self) -> ReachabilityState {
        self.reachability
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(ReachabilityState::Online)
    }

    /// User-visible status of one item
    pub async fn status(&self, identifier: &str) -> Option<ItemStatus> {
        let active = self.active.lock().await.contains_key(identifier);
        let record = self.store.get(identifier).await?;
        Some(ItemStatus {
            state: DisplayState::resolve(&record, active, self.network()),
            identifier: record.identifier,
            bytes_downloaded: record.bytes_downloaded,
            bytes_expected: record.bytes_expected,
        })
    }

    /// Status of every tracked item, ordered by identifier
    pub async fn statuses(&self) -> Vec<ItemStatus> {
        let active: Vec<String> = self.active.lock().await.keys().cloned().collect();
        let network = self.network();
        let mut statuses: Vec<ItemStatus> = self
            .store
            .snapshot_all()
            .await
            .into_values()
            .map(|record| ItemStatus {
                state: DisplayState::resolve(&record, active.contains(&record.identifier), network),
                identifier: record.identifier,
                bytes_downloaded: record.bytes_downloaded,
                bytes_expected: record.bytes_expected,
            })
            .collect();
        statuses.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        statuses
    }
}
