//! Configuration management for ZIM Fetcher
//!
//! Settings come from, in order: built-in defaults, then the first TOML file
//! found (`--config`, `./zim-fetcher.toml`, the user config directory, then
//! `/etc/zim-fetcher/config.toml`). A commented default file is written to
//! the user config directory on first run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{
    ClientConfig, CoordinatorConfig, IconFetcherConfig, TcpProbe, TransportConfig,
};
use crate::constants::{files, http, icons, logging, reachability, store, transfer};
use crate::errors::{AppError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Where catalog, state and archives live
    pub storage: StorageConfigToml,
    /// HTTP client settings
    pub client: ClientConfigToml,
    /// Transfer coordination settings
    pub transfer: TransferConfigToml,
    /// Icon fetcher settings
    pub icons: IconConfigToml,
    /// Network reachability probing
    pub reachability: ReachabilityConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly storage locations; unset paths derive from `data_dir`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfigToml {
    pub data_dir: Option<PathBuf>,
    pub catalog_file: Option<PathBuf>,
    pub settings_file: Option<PathBuf>,
    pub content_dir: Option<PathBuf>,
    pub partial_dir: Option<PathBuf>,
}

/// TOML-friendly client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigToml {
    /// Enable HTTP/2 support
    pub http2: bool,
    /// TCP keep-alive timeout in seconds (None = disabled)
    pub tcp_keepalive_secs: Option<u64>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout in seconds (None = no timeout)
    pub pool_idle_timeout_secs: Option<u64>,
    /// Maximum connections per host
    pub pool_max_per_host: usize,
    /// Timeout for icons and probes in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Rate limit for icons and probes (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfigToml {
    fn default() -> Self {
        Self {
            http2: false,
            tcp_keepalive_secs: Some(30),
            tcp_nodelay: true,
            pool_idle_timeout_secs: Some(http::POOL_IDLE_TIMEOUT.as_secs()),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout_secs: http::DEFAULT_TIMEOUT.as_secs(),
            connect_timeout_secs: http::CONNECT_TIMEOUT.as_secs(),
            rate_limit_rps: http::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

/// TOML-friendly transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfigToml {
    /// Heartbeat cadence for persisting progress in milliseconds
    pub persist_interval_ms: u64,
    /// Minimum spacing of progress events in milliseconds
    pub progress_interval_ms: u64,
    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
    /// Allow transfers on metered connections
    pub allow_metered: bool,
}

impl Default for TransferConfigToml {
    fn default() -> Self {
        Self {
            persist_interval_ms: store::PERSIST_INTERVAL.as_millis() as u64,
            progress_interval_ms: transfer::PROGRESS_EVENT_INTERVAL.as_millis() as u64,
            shutdown_timeout_secs: 5,
            allow_metered: true,
        }
    }
}

/// TOML-friendly icon fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IconConfigToml {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub flush_threshold: usize,
    pub flush_delay_ms: u64,
    pub max_concurrent: usize,
}

impl Default for IconConfigToml {
    fn default() -> Self {
        Self {
            max_attempts: icons::MAX_ATTEMPTS,
            retry_delay_secs: icons::RETRY_DELAY.as_secs(),
            flush_threshold: icons::FLUSH_THRESHOLD,
            flush_delay_ms: icons::FLUSH_DELAY.as_millis() as u64,
            max_concurrent: icons::MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// TOML-friendly reachability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfigToml {
    /// Probe the network while transfers run
    pub enabled: bool,
    pub probe_host: String,
    pub probe_port: u16,
    pub interval_secs: u64,
    pub timeout_ms: u64,
}

impl Default for ReachabilityConfigToml {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_host: reachability::DEFAULT_PROBE_HOST.to_string(),
            probe_port: reachability::DEFAULT_PROBE_PORT,
            interval_secs: reachability::PROBE_INTERVAL.as_secs(),
            timeout_ms: reachability::PROBE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Resolved locations on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub catalog_file: PathBuf,
    pub settings_file: PathBuf,
    pub content_dir: PathBuf,
    pub partial_dir: PathBuf,
}

/// Runtime configuration of every component
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub paths: StoragePaths,
    pub client: ClientConfig,
    pub coordinator: CoordinatorConfig,
    pub transport: TransportConfig,
    pub icons: IconFetcherConfig,
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> RuntimeConfig {
        let paths = self.storage.to_runtime_config();
        let client = self.client.to_runtime_config();
        RuntimeConfig {
            coordinator: self.transfer.to_runtime_config(&paths.content_dir),
            transport: TransportConfig::new(&paths.partial_dir)
                .with_progress_interval(Duration::from_millis(self.transfer.progress_interval_ms))
                .with_client(client.clone()),
            icons: self.icons.to_runtime_config(),
            client,
            paths,
        }
    }

    /// Load configuration from the first file found, else defaults
    ///
    /// An explicit `config_file_override` that does not exist is an error.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) if path.exists() => Some(path),
            Some(path) => return Err(ConfigError::NotFound { path }.into()),
            None => Self::find_config_file(),
        };

        let config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => {
                debug!("No config file found in standard locations");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.client.rate_limit_rps == 0 {
            errors.push("client.rate_limit_rps must be greater than zero".to_string());
        }
        if self.reachability.enabled && self.reachability.interval_secs == 0 {
            errors.push("reachability.interval_secs must be greater than zero".to_string());
        }
        if let Err(e) = self.icons.to_runtime_config().validate() {
            errors.push(e.to_string());
        }
        let coordinator = self.transfer.to_runtime_config(Path::new(files::CONTENT_DIR_NAME));
        if let Err(e) = coordinator.validate() {
            errors.push(e);
        }
        if !matches!(
            self.logging.level.as_str(),
            "error" | "warn" | "info" | "debug" | "trace"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: "Expected one of error, warn, info, debug, trace".to_string(),
            }
            .into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors }.into())
        }
    }

    /// Write a commented default config file if none exists yet
    pub async fn initialize_first_run() -> Result<Option<PathBuf>> {
        let config_path = Self::get_default_config_path()?;

        if config_path.exists() {
            return Ok(Some(config_path));
        }

        info!("Creating default configuration file...");

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(|e| {
                AppError::generic(format!(
                    "Failed to write config file {}: {}",
                    config_path.display(),
                    e
                ))
            })?;

        println!("📁 Created default configuration file:");
        println!("   {}", config_path.display());
        println!();

        Ok(Some(config_path))
    }

    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./zim-fetcher.toml")];
        if let Ok(path) = Self::get_default_config_path() {
            search_paths.push(path);
        }
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc/zim-fetcher/config.toml"));

        search_paths.into_iter().find(|path| {
            let found = path.exists();
            if found {
                debug!("Found config file: {}", path.display());
            }
            found
        })
    }

    /// Default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;

        Ok(config_dir.join(files::APP_DIR_NAME).join("config.toml"))
    }

    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::from)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Default configuration content with comments
    pub fn generate_default_config_content() -> String {
        let default_data_dir = default_data_dir();

        format!(
            r#"# ZIM Fetcher Configuration
# This file was automatically generated on first run.

[storage]
# Defaults to {}
# data_dir = "/path/to/data"
# catalog_file = "/path/to/catalog.json"
# settings_file = "/path/to/settings.json"
# content_dir = "/path/to/content"
# partial_dir = "/path/to/partial"

[client]
http2 = false
tcp_keepalive_secs = 30
tcp_nodelay = true
pool_idle_timeout_secs = {}
pool_max_per_host = {}
request_timeout_secs = {}
connect_timeout_secs = {}
rate_limit_rps = {}

[transfer]
# How often progress is written to disk
persist_interval_ms = {}
progress_interval_ms = {}
shutdown_timeout_secs = 5
allow_metered = true

[icons]
max_attempts = {}
retry_delay_secs = {}
flush_threshold = {}
flush_delay_ms = {}
max_concurrent = {}

[reachability]
enabled = true
probe_host = "{}"
probe_port = {}
interval_secs = {}
timeout_ms = {}

[logging]
level = "{}"  # error, warn, info, debug, trace
"#,
            default_data_dir.display(),
            http::POOL_IDLE_TIMEOUT.as_secs(),
            http::POOL_MAX_PER_HOST,
            http::DEFAULT_TIMEOUT.as_secs(),
            http::CONNECT_TIMEOUT.as_secs(),
            http::DEFAULT_RATE_LIMIT_RPS,
            store::PERSIST_INTERVAL.as_millis(),
            transfer::PROGRESS_EVENT_INTERVAL.as_millis(),
            icons::MAX_ATTEMPTS,
            icons::RETRY_DELAY.as_secs(),
            icons::FLUSH_THRESHOLD,
            icons::FLUSH_DELAY.as_millis(),
            icons::MAX_CONCURRENT_REQUESTS,
            reachability::DEFAULT_PROBE_HOST,
            reachability::DEFAULT_PROBE_PORT,
            reachability::PROBE_INTERVAL.as_secs(),
            reachability::PROBE_TIMEOUT.as_millis(),
            logging::DEFAULT_LOG_LEVEL,
        )
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(files::APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(files::APP_DIR_NAME))
}

impl StorageConfigToml {
    /// Resolve every path, deriving unset ones from the data directory
    pub fn to_runtime_config(&self) -> StoragePaths {
        let data_dir = self.data_dir.clone().unwrap_or_else(default_data_dir);
        StoragePaths {
            catalog_file: self
                .catalog_file
                .clone()
                .unwrap_or_else(|| data_dir.join(files::CATALOG_FILE_NAME)),
            settings_file: self
                .settings_file
                .clone()
                .unwrap_or_else(|| data_dir.join(store::SETTINGS_FILE_NAME)),
            content_dir: self
                .content_dir
                .clone()
                .unwrap_or_else(|| data_dir.join(files::CONTENT_DIR_NAME)),
            partial_dir: self
                .partial_dir
                .clone()
                .unwrap_or_else(|| data_dir.join(files::PARTIAL_DIR_NAME)),
            data_dir,
        }
    }
}

impl ClientConfigToml {
    /// Convert to runtime ClientConfig
    pub fn to_runtime_config(&self) -> ClientConfig {
        ClientConfig {
            http2: self.http2,
            tcp_keepalive: self.tcp_keepalive_secs.map(Duration::from_secs),
            tcp_nodelay: self.tcp_nodelay,
            pool_idle_timeout: self.pool_idle_timeout_secs.map(Duration::from_secs),
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}

impl TransferConfigToml {
    /// Convert to runtime CoordinatorConfig
    pub fn to_runtime_config(&self, content_dir: &Path) -> CoordinatorConfig {
        CoordinatorConfig {
            content_dir: content_dir.to_path_buf(),
            persist_interval: Duration::from_millis(self.persist_interval_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            allow_metered: self.allow_metered,
        }
    }
}

impl IconConfigToml {
    /// Convert to runtime IconFetcherConfig
    pub fn to_runtime_config(&self) -> IconFetcherConfig {
        IconFetcherConfig {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            flush_threshold: self.flush_threshold,
            flush_delay: Duration::from_millis(self.flush_delay_ms),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl ReachabilityConfigToml {
    pub fn probe(&self) -> TcpProbe {
        TcpProbe::new(
            self.probe_host.clone(),
            self.probe_port,
            Duration::from_millis(self.timeout_ms),
        )
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
