//! Prelude module for ZIM Fetcher Library
//!
//! This module re-exports the most commonly used items from the library,
//! providing a convenient way to import everything needed for typical usage
//! with a single `use zim_fetcher::prelude::*;` statement.
//!
//! # Usage
//!
//! ```rust,no_run
//! use zim_fetcher::prelude::*;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let catalog = Arc::new(JsonCatalog::open("catalog.json").await?);
//!     let store = Arc::new(StateStore::open(Arc::new(FileSettings::new("settings.json"))).await?);
//!     let (events_tx, _events_rx) = mpsc::channel(1024);
//!     let transport = Arc::new(HttpTransport::new(TransportConfig::new("partial"), events_tx)?);
//!
//!     let hooks = CompletionHooks::new("content", Arc::new(LoggingContentStore), Arc::new(LoggingNotifier));
//!     let _coordinator =
//!         TransferCoordinator::new(CoordinatorConfig::default(), catalog, store, transport, hooks);
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

pub use crate::app::{
    // Collaborators
    Catalog,
    CatalogEntry,
    ClientConfig,
    CompletionHooks,
    ContentStore,
    CoordinatorConfig,
    FileSettings,
    HttpTransport,
    IconFetcher,
    IconFetcherConfig,
    JsonCatalog,
    LoggingContentStore,
    LoggingNotifier,
    Notifier,
    ReachabilityMonitor,
    ReachabilityState,
    StateStore,
    // Core orchestration
    TransferCoordinator,
    TransferHandle,
    TransferOutcome,
    TransferProgress,
    TransportConfig,
};

// Commonly used constants
pub use crate::constants::{DOWNLOAD_STATES_KEY, METADATA_SUFFIX, USER_AGENT};

pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
