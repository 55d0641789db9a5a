//! Network reachability
//!
//! A single current value, `Online` or `Offline`, recomputed by a background
//! probe loop while monitoring is active. The value starts as `Online` and is
//! never persisted.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::reachability;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityState {
    Online,
    Offline,
}

impl ReachabilityState {
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for ReachabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// One connectivity check
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Opens a TCP connection to a well-known host
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(
            reachability::DEFAULT_PROBE_HOST,
            reachability::DEFAULT_PROBE_PORT,
            reachability::PROBE_TIMEOUT,
        )
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        let address = (self.host.as_str(), self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe of {}:{} failed: {}", self.host, self.port, e);
                false
            }
            Err(_) => {
                debug!("Probe of {}:{} timed out", self.host, self.port);
                false
            }
        }
    }
}

/// Publishes the current reachability state
pub struct ReachabilityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
    state: Arc<watch::Sender<ReachabilityState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReachabilityMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, interval: Duration) -> Self {
        let (state, _) = watch::channel(ReachabilityState::Online);
        Self {
            probe,
            interval,
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    /// Begin probing in the background; calling it again is a no-op
    pub fn start_monitoring(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let probe = self.probe.clone();
        let state = self.state.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let observed = if probe.is_reachable().await {
                    ReachabilityState::Online
                } else {
                    ReachabilityState::Offline
                };
                publish(&state, observed);
            }
        }));
        debug!("Reachability monitoring started");
    }

    /// Stop probing; the last value stays published
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            debug!("Reachability monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Push a state observed elsewhere, e.g. a platform path-change callback
    pub fn report(&self, observed: ReachabilityState) {
        publish(&self.state, observed);
    }

    pub fn current(&self) -> ReachabilityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReachabilityState> {
        self.state.subscribe()
    }
}

impl Drop for ReachabilityMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

fn publish(state: &watch::Sender<ReachabilityState>, observed: ReachabilityState) {
    let changed = state.send_if_modified(|current| {
        if *current == observed {
            false
        } else {
            *current = observed;
            true
        }
    });
    if changed {
        info!("Network is now {}", observed);
    }
}
