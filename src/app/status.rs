//! User-visible state of a download
//!
//! Combines the persisted record, whether a transfer is running, and network
//! reachability into the label shown next to an item.

use std::fmt;

use crate::app::reachability::ReachabilityState;
use crate::app::store::DownloadRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Downloading,
    /// Paused, or running while the network is gone
    WaitingForNetwork,
    Paused,
    /// Stopped by a failure that can be resumed
    Interrupted { message: String },
    /// Only a fresh start can recover
    Failed { message: String },
    /// Known but not running, e.g. before relaunch recovery
    Pending,
}

impl DisplayState {
    pub fn resolve(record: &DownloadRecord, active: bool, network: ReachabilityState) -> Self {
        let online = network.is_online();
        match (&record.resume_token, &record.last_error) {
            (Some(_), _) if !online => Self::WaitingForNetwork,
            (Some(_), Some(message)) => Self::Interrupted {
                message: message.clone(),
            },
            (Some(_), None) => Self::Paused,
            (None, Some(message)) if !active => Self::Failed {
                message: message.clone(),
            },
            _ if active && !online => Self::WaitingForNetwork,
            _ if active => Self::Downloading,
            _ => Self::Pending,
        }
    }

    /// Whether `resume` can be offered
    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused | Self::Interrupted { .. })
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downloading => write!(f, "downloading"),
            Self::WaitingForNetwork => write!(f, "waiting for network"),
            Self::Paused => write!(f, "paused"),
            Self::Interrupted { message } => write!(f, "interrupted: {}", message),
            Self::Failed { message } => write!(f, "failed: {}", message),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// Snapshot of one item for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStatus {
    pub identifier: String,
    pub bytes_downloaded: u64,
    pub bytes_expected: u64,
    pub state: DisplayState,
}

impl ItemStatus {
    pub fn percent(&self) -> Option<f64> {
        (self.bytes_expected > 0)
            .then(|| self.bytes_downloaded as f64 * 100.0 / self.bytes_expected as f64)
    }
}
