//! Configuration for the transfer coordinator

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{coordinator, files, store};

/// Configuration for the transfer coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Where finished archives are moved
    pub content_dir: PathBuf,
    /// Heartbeat cadence for writing progress to disk
    pub persist_interval: Duration,
    /// Maximum time to wait for background tasks on shutdown
    pub shutdown_timeout: Duration,
    /// Allow transfers on metered connections
    pub allow_metered: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from(files::CONTENT_DIR_NAME),
            persist_interval: store::PERSIST_INTERVAL,
            shutdown_timeout: coordinator::TASK_SHUTDOWN_TIMEOUT,
            allow_metered: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.content_dir = dir.into();
        self
    }

    /// Set the progress persistence cadence
    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_allow_metered(mut self, allow: bool) -> Self {
        self.allow_metered = allow;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.persist_interval.is_zero() {
            return Err("Persist interval cannot be zero".to_string());
        }

        if self.shutdown_timeout.is_zero() {
            return Err("Shutdown timeout cannot be zero".to_string());
        }

        if self.content_dir.as_os_str().is_empty() {
            return Err("Content directory cannot be empty".to_string());
        }

        Ok(())
    }
}
