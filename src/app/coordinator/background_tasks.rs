//! Background task management for the coordinator
//!
//! Runs the transport event loop, the persistence heartbeat and optional
//! periodic progress logging, all sharing one shutdown broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::app::coordinator::TransferCoordinator;
use crate::app::status::DisplayState;
use crate::app::store::StateStore;
use crate::app::transport::TransportEvent;
use crate::constants::coordinator;

/// Background task manager for the event loop and heartbeat
pub struct BackgroundTaskManager {
    tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl BackgroundTaskManager {
    /// Create a new background task manager
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            shutdown_timeout: coordinator::TASK_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Feed transport events to the coordinator in arrival order
    ///
    /// Stops when the transport drops its sender or shutdown is broadcast.
    pub fn start_event_loop(
        &mut self,
        coordinator: Arc<TransferCoordinator>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Some(event) => coordinator.handle_event(event).await,
                        None => {
                            debug!("Transport event channel closed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("Event loop received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Write dirty progress to the settings backend every `interval`
    ///
    /// A final flush runs when shutdown is broadcast.
    pub fn start_heartbeat(
        &mut self,
        store: Arc<StateStore>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.flush_if_dirty().await {
                            Ok(true) => debug!("Heartbeat persisted download states"),
                            Ok(false) => {}
                            Err(e) => warn!("Heartbeat could not persist download states: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Heartbeat received shutdown signal");
                        break;
                    }
                }
            }

            if let Err(e) = store.flush().await {
                warn!("Final flush of download states failed: {}", e);
            }
        });

        self.tasks.push(task);
    }

    /// Log a one-line summary of running transfers every `interval`
    pub fn start_periodic_logging_task(
        &mut self,
        coordinator: Arc<TransferCoordinator>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let statuses = coordinator.statuses().await;
                        let running: Vec<_> = statuses
                            .iter()
                            .filter(|status| {
                                matches!(status.state, DisplayState::Downloading | DisplayState::WaitingForNetwork)
                            })
                            .collect();
                        for status in &running {
                            match status.percent() {
                                Some(percent) => info!(
                                    "{}: {:.1}% ({} of {} bytes, {})",
                                    status.identifier,
                                    percent,
                                    status.bytes_downloaded,
                                    status.bytes_expected,
                                    status.state
                                ),
                                None => info!(
                                    "{}: {} bytes ({})",
                                    status.identifier, status.bytes_downloaded, status.state
                                ),
                            }
                        }
                        if running.is_empty() {
                            debug!("No transfers running ({} tracked)", statuses.len());
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Periodic logging task received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Shutdown all background tasks with timeout
    pub async fn shutdown_all(self) {
        debug!("Initiating background task shutdown");

        for task in self.tasks {
            if tokio::time::timeout(self.shutdown_timeout, task)
                .await
                .is_err()
            {
                warn!(
                    "Background task shutdown timed out after {:?}",
                    self.shutdown_timeout
                );
            }
        }

        debug!("All background tasks shutdown complete");
    }

    /// Get the number of active background tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}
