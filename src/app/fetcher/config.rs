//! Icon fetcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::icons;
use crate::errors::{DownloadError, DownloadResult};

/// Configuration for the icon fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IconFetcherConfig {
    /// Attempts per identifier, including the first one
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Cache size that triggers an immediate flush
    pub flush_threshold: usize,
    /// Quiet period before a partial cache is flushed
    pub flush_delay: Duration,
    /// Simultaneous requests
    pub max_concurrent: usize,
}

impl Default for IconFetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: icons::MAX_ATTEMPTS,
            retry_delay: icons::RETRY_DELAY,
            flush_threshold: icons::FLUSH_THRESHOLD,
            flush_delay: icons::FLUSH_DELAY,
            max_concurrent: icons::MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl IconFetcherConfig {
    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> DownloadResult<()> {
        if self.max_attempts == 0 {
            return Err(DownloadError::ConfigurationError {
                reason: "Icon attempts cannot be zero".to_string(),
            });
        }

        if self.flush_threshold == 0 {
            return Err(DownloadError::ConfigurationError {
                reason: "Icon flush threshold cannot be zero".to_string(),
            });
        }

        if self.max_concurrent == 0 {
            return Err(DownloadError::ConfigurationError {
                reason: "Icon concurrency cannot be zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn with_max_concurrent(mut self, concurrent: usize) -> Self {
        self.max_concurrent = concurrent;
        self
    }
}
