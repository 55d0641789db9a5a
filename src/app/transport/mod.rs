//! Transport abstraction
//!
//! A transport performs the network I/O for a transfer and reports back on a
//! single ordered event channel. For each attempt it emits zero or more
//! [`TransportEvent::Progress`] events in non-decreasing byte order, an
//! optional [`TransportEvent::Paused`] acknowledgement, and exactly one
//! [`TransportEvent::Completed`] event.
//!
//! All control methods return as soon as the request is issued.

pub mod http;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use url::Url;

use crate::app::models::{ResumeToken, TransferRequest};
use crate::errors::DownloadResult;

pub use http::{HttpTransport, TransportConfig};

/// Identifies one transfer attempt; a resume gets a new id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Process-unique id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A transfer the transport is currently running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub task: TaskId,
    pub identifier: String,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
}

/// Categories of transfer failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Cancelled,
    TimedOut,
    CannotFindHost,
    CannotConnect,
    ConnectionLost,
    NotConnected,
    BadServerResponse,
    CannotWriteFile,
    Other,
}

impl TransportErrorKind {
    /// Message shown to the user for this kind of failure
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Cancelled => "The download was cancelled.",
            Self::TimedOut => "The request timed out.",
            Self::CannotFindHost => "A server with the specified hostname could not be found.",
            Self::CannotConnect => "Could not connect to the server.",
            Self::ConnectionLost => "The network connection was lost.",
            Self::NotConnected => "The Internet connection appears to be offline.",
            Self::BadServerResponse => "The server returned a bad response.",
            Self::CannotWriteFile => "The downloaded data could not be written to disk.",
            Self::Other => "An unknown error occurred.",
        }
    }
}

/// Failure attached to a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub description: String,
    /// Present when the attempt can continue from where it stopped
    pub resume_data: Option<ResumeToken>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            description: kind.describe().to_string(),
            resume_data: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_resume_data(mut self, resume_data: Option<ResumeToken>) -> Self {
        self.resume_data = resume_data;
        self
    }
}

/// The temporary file a finished transfer produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    /// Name from `Content-Disposition`, if the server sent one
    pub suggested_filename: Option<String>,
    pub url: Url,
}

/// Terminal report for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCompletion {
    /// Final HTTP status, when a response was received
    pub status: Option<u16>,
    pub file: Option<DownloadedFile>,
    pub error: Option<TransportError>,
}

impl TransferCompletion {
    pub fn succeeded(status: u16, file: DownloadedFile) -> Self {
        Self {
            status: Some(status),
            file: Some(file),
            error: None,
        }
    }

    pub fn rejected(status: u16) -> Self {
        Self {
            status: Some(status),
            file: None,
            error: None,
        }
    }

    pub fn failed(error: TransportError) -> Self {
        Self {
            status: None,
            file: None,
            error: Some(error),
        }
    }
}

/// Asynchronous report from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Progress {
        task: TaskId,
        identifier: String,
        bytes_written: u64,
        bytes_expected: Option<u64>,
    },
    /// Answer to a pause request; `None` means the transfer could not be paused
    Paused {
        task: TaskId,
        identifier: String,
        /// Bytes on disk when the attempt stopped
        bytes_written: u64,
        resume_data: Option<ResumeToken>,
    },
    Completed {
        task: TaskId,
        identifier: String,
        completion: TransferCompletion,
    },
}

impl TransportEvent {
    pub fn task(&self) -> TaskId {
        match self {
            Self::Progress { task, .. } | Self::Paused { task, .. } | Self::Completed { task, .. } => {
                *task
            }
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Progress { identifier, .. }
            | Self::Paused { identifier, .. }
            | Self::Completed { identifier, .. } => identifier,
        }
    }
}

/// Network layer driven by the transfer coordinator
pub trait Transport: Send + Sync {
    /// Begin a fresh transfer
    fn start(&self, request: TransferRequest) -> DownloadResult<TaskId>;

    /// Continue a transfer from a token this transport produced
    fn resume(&self, identifier: &str, token: &ResumeToken) -> DownloadResult<TaskId>;

    /// Stop while keeping the bytes; answered by a `Paused` event
    fn pause(&self, task: TaskId);

    /// Stop and discard partial data
    fn cancel(&self, task: TaskId);

    /// Drop partial data referenced by a token that will never be resumed
    fn discard(&self, token: &ResumeToken);

    /// Transfers currently running
    fn tasks(&self) -> Vec<TaskSnapshot>;

    /// Build a token from leftovers of an attempt that was never paused
    fn salvage(&self, _request: &TransferRequest) -> Option<ResumeToken> {
        None
    }
}
