//! Caller-facing handle for one transfer attempt
//!
//! `start` and `resume` hand back a [`TransferHandle`]: a stream of progress
//! updates plus a single terminal [`TransferOutcome`]. Dropping the handle
//! does not affect the transfer.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::constants::transfer::PROGRESS_CHANNEL_CAPACITY;

/// Progress of the attempt a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_downloaded: u64,
    /// Zero while unknown
    pub bytes_expected: u64,
    /// Estimated time left, once enough samples arrived
    pub remaining: Option<Duration>,
}

impl TransferProgress {
    pub fn fraction_completed(&self) -> Option<f64> {
        (self.bytes_expected > 0).then(|| self.bytes_downloaded as f64 / self.bytes_expected as f64)
    }
}

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Bytes acquired; `path` is `None` when relocation failed
    Completed { path: Option<PathBuf> },
    /// Stopped by the user with a resume token stored
    Paused,
    /// Stopped by a resumable failure
    Interrupted { message: String },
    /// Terminal failure for this attempt
    Failed { message: String },
    Cancelled,
    /// The coordinator went away before the attempt finished
    Detached,
}

/// Sending half kept by the coordinator while the attempt is active
#[derive(Debug)]
pub(crate) struct Subscriber {
    progress: mpsc::Sender<TransferProgress>,
    result: oneshot::Sender<TransferOutcome>,
}

impl Subscriber {
    /// Non-blocking; updates are dropped when the caller falls behind
    pub fn progress(&self, update: TransferProgress) {
        let _ = self.progress.try_send(update);
    }

    pub fn finish(self, outcome: TransferOutcome) {
        let _ = self.result.send(outcome);
    }
}

/// Create a connected subscriber and handle
pub(crate) fn subscription(identifier: &str) -> (Subscriber, TransferHandle) {
    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let (result_tx, result_rx) = oneshot::channel();
    (
        Subscriber {
            progress: progress_tx,
            result: result_tx,
        },
        TransferHandle {
            identifier: identifier.to_string(),
            progress: ProgressEvents { rx: progress_rx },
            result: TransferResult { rx: result_rx },
        },
    )
}

/// Progress stream and terminal result of one attempt
#[derive(Debug)]
pub struct TransferHandle {
    identifier: String,
    progress: ProgressEvents,
    result: TransferResult,
}

impl TransferHandle {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Next progress update, `None` once the attempt has ended
    pub async fn next_progress(&mut self) -> Option<TransferProgress> {
        self.progress.rx.recv().await
    }

    /// Split into independently consumable halves
    pub fn into_parts(self) -> (ProgressEvents, TransferResult) {
        (self.progress, self.result)
    }

    /// Ignore progress and wait for the outcome
    pub async fn wait(self) -> TransferOutcome {
        self.result.await
    }
}

/// Stream of [`TransferProgress`]
#[derive(Debug)]
pub struct ProgressEvents {
    rx: mpsc::Receiver<TransferProgress>,
}

impl Stream for ProgressEvents {
    type Item = TransferProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Future resolving to the attempt's [`TransferOutcome`]
#[derive(Debug)]
pub struct TransferResult {
    rx: oneshot::Receiver<TransferOutcome>,
}

impl Future for TransferResult {
    type Output = TransferOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(TransferOutcome::Detached))
    }
}
