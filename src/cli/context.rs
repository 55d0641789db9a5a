//! Service wiring for CLI commands
//!
//! Builds the catalog, state store, HTTP transport and coordinator from an
//! [`AppConfig`], starts the event loop and persistence heartbeat, and runs
//! relaunch recovery before any command touches the records.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::app::{
    BackgroundTaskManager, CompletionHooks, ConnectivityProbe, FileSettings, HttpHandler,
    HttpTransport, JsonCatalog, LoggingContentStore, LoggingNotifier, ReachabilityMonitor,
    ReachabilityState, SettingsBackend, StateStore, TransferCoordinator,
};
use crate::app::coordinator::signals::create_shutdown_channel;
use crate::config::{AppConfig, RuntimeConfig};
use crate::constants::progress::STATUS_LOG_INTERVAL;
use crate::constants::transfer::EVENT_CHANNEL_CAPACITY;
use crate::errors::Result;

/// Open the catalog named by the configuration
pub async fn open_catalog(runtime: &RuntimeConfig) -> Result<Arc<JsonCatalog>> {
    let catalog = JsonCatalog::open(&runtime.paths.catalog_file).await?;
    debug!(
        "Catalog {} has {} entries",
        runtime.paths.catalog_file.display(),
        catalog.len()
    );
    Ok(Arc::new(catalog))
}

/// Rate-limited client for icons and HEAD probes
pub fn http_handler(runtime: &RuntimeConfig) -> Result<Arc<HttpHandler>> {
    let client = runtime.client.build_http_client()?;
    Ok(Arc::new(HttpHandler::new(client, runtime.client.rate_limit_rps)?))
}

/// Running download services
pub struct AppContext {
    pub config: AppConfig,
    pub runtime: RuntimeConfig,
    pub catalog: Arc<JsonCatalog>,
    pub store: Arc<StateStore>,
    pub coordinator: Arc<TransferCoordinator>,
    pub reachability: Option<ReachabilityMonitor>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: BackgroundTaskManager,
}

impl AppContext {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let runtime = config.to_runtime_config();
        let catalog = open_catalog(&runtime).await?;

        let backend: Arc<dyn SettingsBackend> =
            Arc::new(FileSettings::new(&runtime.paths.settings_file));
        let store = Arc::new(StateStore::open(backend).await?);

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(HttpTransport::new(runtime.transport.clone(), events_tx)?);
        let hooks = CompletionHooks::new(
            &runtime.coordinator.content_dir,
            Arc::new(LoggingContentStore),
            Arc::new(LoggingNotifier),
        );

        let reachability = config.reachability.enabled.then(|| {
            ReachabilityMonitor::new(
                Arc::new(config.reachability.probe()),
                config.reachability.interval(),
            )
        });

        let mut coordinator = TransferCoordinator::new(
            runtime.coordinator.clone(),
            catalog.clone(),
            store.clone(),
            transport,
            hooks,
        );
        if let Some(monitor) = &reachability {
            coordinator = coordinator.with_reachability(monitor.subscribe());
        }
        let coordinator = Arc::new(coordinator);

        let (shutdown_tx, _) = create_shutdown_channel();
        let mut tasks =
            BackgroundTaskManager::new().with_shutdown_timeout(runtime.coordinator.shutdown_timeout);
        tasks.start_event_loop(coordinator.clone(), events_rx, shutdown_tx.subscribe());
        tasks.start_heartbeat(
            store.clone(),
            runtime.coordinator.persist_interval,
            shutdown_tx.subscribe(),
        );

        coordinator.restart_monitoring_if_needed().await;

        Ok(Self {
            config,
            runtime,
            catalog,
            store,
            coordinator,
            reachability,
            shutdown_tx,
            tasks,
        })
    }

    /// Probe the network and log progress while a transfer runs
    pub fn start_monitoring(&mut self) {
        if let Some(monitor) = &self.reachability {
            monitor.start_monitoring();
        }
        self.tasks.start_periodic_logging_task(
            self.coordinator.clone(),
            STATUS_LOG_INTERVAL,
            self.shutdown_tx.subscribe(),
        );
    }

    /// Run a single probe and publish its result
    pub async fn refresh_reachability(&self) -> ReachabilityState {
        let Some(monitor) = &self.reachability else {
            return ReachabilityState::Online;
        };
        let state = if self.config.reachability.probe().is_reachable().await {
            ReachabilityState::Online
        } else {
            ReachabilityState::Offline
        };
        monitor.report(state);
        state
    }

    /// Stop background work and write the final state
    pub async fn shutdown(self) {
        if let Some(monitor) = &self.reachability {
            monitor.stop_monitoring();
        }
        let _ = self.shutdown_tx.send(());
        self.tasks.shutdown_all().await;
        info!("Download state saved");
    }
}
