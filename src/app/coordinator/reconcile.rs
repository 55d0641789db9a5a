//! Classification of terminal transport events
//!
//! A completion says little on its own: no error may still mean an HTTP
//! rejection, and an error with resume data may be the pause the user just
//! asked for. The pending-pause flag set by `pause()` decides the latter.

use crate::app::models::ResumeToken;
use crate::app::transport::{DownloadedFile, TransferCompletion};

/// What a completion means for the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Bytes acquired; relocate and delete the record
    Succeeded { file: Option<DownloadedFile> },
    /// Server refused the transfer; delete the record
    Rejected { status: u16 },
    /// The stop requested by `pause()`
    PauseConfirmed { resume_data: ResumeToken },
    /// Failure that can continue from `resume_data`
    Interrupted {
        resume_data: ResumeToken,
        message: String,
    },
    /// Failure with nothing to resume from; keep the record with its error
    Failed { message: String },
}

/// Decide what a completion means
pub fn classify(completion: TransferCompletion, pending_pause: bool) -> Resolution {
    match completion.error {
        None => match completion.status {
            Some(status) if !(200..300).contains(&status) => Resolution::Rejected { status },
            _ => Resolution::Succeeded {
                file: completion.file,
            },
        },
        Some(error) => match error.resume_data {
            Some(resume_data) if pending_pause => Resolution::PauseConfirmed { resume_data },
            Some(resume_data) => Resolution::Interrupted {
                resume_data,
                message: error.description,
            },
            None => Resolution::Failed {
                message: error.description,
            },
        },
    }
}

/// Message stored for a rejected transfer
pub fn rejection_message(status: u16) -> String {
    format!("The server responded with HTTP {}.", status)
}
