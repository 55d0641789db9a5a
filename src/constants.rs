//! Application constants for ZIM Fetcher
//!
//! This module centralizes all constants used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "ZIM-Fetcher/0.1.0 (Offline Content Downloader)";

    /// Timeout for short requests (icons, HEAD probes)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 8;

    /// Maximum number of redirects to follow
    pub const MAX_REDIRECTS: usize = 10;

    /// Default request rate for the short-request client
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;
}

/// Transfer engine constants
pub mod transfer {
    use super::Duration;

    /// Extension of metalink descriptors that point at the real payload
    pub const METADATA_SUFFIX: &str = ".meta4";

    /// Extension appended to the identifier when no better file name exists
    pub const FALLBACK_EXTENSION: &str = "zim";

    /// Suffix of partial files kept for resumable transfers
    pub const PARTIAL_FILE_SUFFIX: &str = ".part";

    /// Minimum spacing between progress events from one transfer
    pub const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_millis(100);

    /// Capacity of the transport event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

    /// Capacity of each per-transfer progress stream
    pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;
}

/// State store constants
pub mod store {
    use super::Duration;

    /// Well-known settings key holding all download records
    pub const DOWNLOAD_STATES_KEY: &str = "downloadStates";

    /// File name of the settings document
    pub const SETTINGS_FILE_NAME: &str = "settings.json";

    /// Cadence at which dirty progress is written to disk
    pub const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

    /// Temporary file suffix for atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";
}

/// Icon fetcher constants
pub mod icons {
    use super::Duration;

    /// Attempts per identifier before the icon is dropped
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Fixed delay between attempts
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);

    /// Cache size that triggers an immediate flush
    pub const FLUSH_THRESHOLD: usize = 5;

    /// Delay before a partial cache is flushed
    pub const FLUSH_DELAY: Duration = Duration::from_millis(500);

    /// Simultaneous icon requests
    pub const MAX_CONCURRENT_REQUESTS: usize = 1;
}

/// Reachability monitoring constants
pub mod reachability {
    use super::Duration;

    /// Host probed for connectivity
    pub const DEFAULT_PROBE_HOST: &str = "download.kiwix.org";

    /// Port probed for connectivity
    pub const DEFAULT_PROBE_PORT: u16 = 443;

    /// Interval between connectivity probes
    pub const PROBE_INTERVAL: Duration = Duration::from_secs(10);

    /// Timeout of a single probe
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
}

/// Progress reporting and estimation
pub mod progress {
    use super::Duration;

    /// Progress bar refresh frequency (milliseconds)
    pub const UPDATE_FREQUENCY_MS: u64 = 100;

    /// Samples older than this are ignored by the ETA estimator
    pub const ETA_WINDOW: Duration = Duration::from_secs(2);

    /// Spacing of status lines in the log while a transfer runs
    pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
}

/// Coordinator and orchestration constants
pub mod coordinator {
    use super::Duration;

    /// Timeout for background task shutdown
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long the CLI waits for a pause acknowledgement
    pub const PAUSE_ACK_TIMEOUT: Duration = Duration::from_secs(10);
}

/// File and directory names
pub mod files {
    /// Application directory name under the platform data/config dirs
    pub const APP_DIR_NAME: &str = "zim-fetcher";

    /// Catalog document file name
    pub const CATALOG_FILE_NAME: &str = "catalog.json";

    /// Sub-directory for finished archives
    pub const CONTENT_DIR_NAME: &str = "content";

    /// Sub-directory for partial transfers
    pub const PARTIAL_DIR_NAME: &str = "partial";
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use store::DOWNLOAD_STATES_KEY;
pub use transfer::METADATA_SUFFIX;
