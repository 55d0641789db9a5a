//! Per-item download record and its persisted form

use serde::{Deserialize, Serialize};

use crate::app::models::ResumeToken;

/// Progress and recovery state of one item
///
/// A stored resume token means the item is paused. No token with an error
/// means the last attempt failed for good and only a fresh start is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub identifier: String,
    pub bytes_downloaded: u64,
    /// Zero while the size is unknown
    pub bytes_expected: u64,
    pub resume_token: Option<ResumeToken>,
    pub last_error: Option<String>,
}

impl DownloadRecord {
    /// Fresh record with no progress
    pub fn new(identifier: impl Into<String>, bytes_expected: u64) -> Self {
        Self {
            identifier: identifier.into(),
            bytes_downloaded: 0,
            bytes_expected,
            resume_token: None,
            last_error: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.resume_token.is_some()
    }

    /// Terminal failure: nothing to resume from
    pub fn is_failed(&self) -> bool {
        self.resume_token.is_none() && self.last_error.is_some()
    }

    /// Apply a progress report, keeping `downloaded <= expected` when the size is known
    pub fn set_progress(&mut self, bytes_downloaded: u64, bytes_expected: u64) {
        self.bytes_downloaded = bytes_downloaded;
        self.bytes_expected = clamp_expected(bytes_downloaded, bytes_expected);
    }

    /// Fraction in `0.0..=1.0`, or `None` while the size is unknown
    pub fn fraction_completed(&self) -> Option<f64> {
        if self.bytes_expected == 0 {
            None
        } else {
            Some(self.bytes_downloaded as f64 / self.bytes_expected as f64)
        }
    }
}

/// An expected size smaller than what already arrived is treated as unknown
pub(crate) fn clamp_expected(bytes_downloaded: u64, bytes_expected: u64) -> u64 {
    if bytes_expected < bytes_downloaded {
        0
    } else {
        bytes_expected
    }
}

/// On-disk layout of a record: `{downloaded, total, resumeData?, error?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedRecord {
    pub downloaded: i64,
    pub total: i64,
    #[serde(rename = "resumeData", default, skip_serializing_if = "Option::is_none")]
    pub resume_data: Option<ResumeToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersistedRecord {
    pub fn from_record(record: &DownloadRecord) -> Self {
        Self {
            downloaded: i64::try_from(record.bytes_downloaded).unwrap_or(i64::MAX),
            total: i64::try_from(record.bytes_expected).unwrap_or(i64::MAX),
            resume_data: record.resume_token.clone(),
            error: record.last_error.clone(),
        }
    }

    pub fn into_record(self, identifier: String) -> DownloadRecord {
        let downloaded = self.downloaded.max(0) as u64;
        let total = self.total.max(0) as u64;
        DownloadRecord {
            identifier,
            bytes_downloaded: downloaded,
            bytes_expected: clamp_expected(downloaded, total),
            resume_token: self.resume_data,
            last_error: self.error,
        }
    }
}
