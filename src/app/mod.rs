//! Core application logic for ZIM Fetcher
//!
//! This module contains the download subsystem: the durable state store, the
//! resumable HTTP transport, the transfer coordinator that reconciles the two,
//! the icon fetcher and the reachability monitor.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zim_fetcher::app::{FileSettings, SettingsBackend, StateStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend: Arc<dyn SettingsBackend> = Arc::new(FileSettings::new("settings.json"));
//! let store = StateStore::open(backend).await?;
//!
//! let mut updates = store.subscribe();
//! while updates.changed().await.is_ok() {
//!     for (identifier, record) in updates.borrow().iter() {
//!         println!("{}: {} of {} bytes", identifier, record.bytes_downloaded, record.bytes_expected);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod coordinator;
pub mod fetcher;
pub mod models;
pub mod reachability;
pub mod status;
pub mod store;
pub mod transport;

// Re-export main public API
pub use catalog::{Catalog, IconSink, JsonCatalog};
pub use client::{ClientConfig, HttpHandler, ProbeReport};
pub use coordinator::{
    BackgroundTaskManager, CompletionHooks, ContentStore, CoordinatorConfig, EtaEstimator,
    LoggingContentStore, LoggingNotifier, Notifier, TransferCoordinator, TransferHandle,
    TransferOutcome, TransferProgress,
};
pub use fetcher::{HttpIconSource, IconFetcher, IconFetcherConfig, IconSource};
pub use models::{CatalogEntry, ResumeToken, TransferRequest, strip_metadata_suffix};
pub use reachability::{ConnectivityProbe, ReachabilityMonitor, ReachabilityState, TcpProbe};
pub use status::{DisplayState, ItemStatus};
pub use store::{DownloadRecord, FileSettings, MemorySettings, SettingsBackend, StateStore};
pub use transport::{
    HttpTransport, TaskId, Transport, TransportConfig, TransportError, TransportErrorKind,
    TransportEvent,
};
