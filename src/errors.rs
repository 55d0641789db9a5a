//! Error types for ZIM Fetcher
//!
//! Each subsystem has its own error enum. Transport failures during a transfer
//! never surface through these types: the coordinator turns them into record
//! mutations. What remains here is caller misuse, I/O and configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Transfer and HTTP client errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Identifier is not present in the catalog
    #[error("Unknown catalog item: {identifier}")]
    UnknownItem { identifier: String },

    /// A transfer for the identifier is already running
    #[error("A transfer is already active for {identifier}")]
    AlreadyActive { identifier: String },

    /// Resume was requested but no resume token is stored
    #[error("Transfer for {identifier} is not paused; start it again instead")]
    NotPaused { identifier: String },

    /// Resume token could not be decoded by the transport
    #[error("Invalid resume token: {reason}")]
    InvalidResumeToken { reason: String },

    /// HTTP request error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Server returned error status
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Response body was not what the caller asked for
    #[error("Unexpected content type: {content_type}")]
    UnexpectedContent { content_type: String },

    /// Completed file could not be moved into the content directory
    #[error("Could not move {from} to {to}: {source}")]
    RelocationFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Client could not be constructed
    #[error("Client configuration error: {reason}")]
    ConfigurationError { reason: String },

    /// Background task went away
    #[error("Channel communication error")]
    ChannelClosed,
}

/// Durable state store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Settings document could not be read or written
    #[error("Settings I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings document is not valid JSON
    #[error("Settings document is corrupted")]
    Corrupted(#[from] serde_json::Error),
}

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Catalog file could not be read or written
    #[error("Catalog I/O error")]
    Io(#[from] std::io::Error),

    /// Catalog file is not valid JSON
    #[error("Catalog parsing error")]
    Parse(#[from] serde_json::Error),

    /// Entry URL is not absolute
    #[error("Invalid catalog URL for {identifier}: {url}")]
    InvalidUrl { identifier: String, url: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// State store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Catalog error
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(DownloadError::Http(_))
            | AppError::Download(DownloadError::ServerError { .. })
            | AppError::Download(DownloadError::AlreadyActive { .. })
            | AppError::Store(StoreError::Io { .. }) => true,

            AppError::Download(DownloadError::UnknownItem { .. })
            | AppError::Download(DownloadError::NotPaused { .. })
            | AppError::Download(DownloadError::InvalidResumeToken { .. })
            | AppError::Config(ConfigError::InvalidFormat(_)) => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Download(_) => "download",
            AppError::Store(_) => "store",
            AppError::Catalog(_) => "catalog",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Catalog result type alias
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;
