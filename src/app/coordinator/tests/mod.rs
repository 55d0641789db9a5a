//! Unit tests for the transfer coordinator
//!
//! A scripted transport stands in for HTTP; events are fed straight into
//! `handle_event` so every interleaving is deterministic. Integration tests
//! against a real HTTP server live in the top-level tests directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use url::Url;

use crate::app::catalog::JsonCatalog;
use crate::app::models::{CatalogEntry, ResumeToken, TransferRequest};
use crate::app::reachability::ReachabilityState;
use crate::app::status::DisplayState;
use crate::app::transport::{
    DownloadedFile, TaskId, TaskSnapshot, TransferCompletion, Transport, TransportError,
    TransportErrorKind, TransportEvent,
};
use crate::errors::{DownloadError, DownloadResult};

use super::*;

/// Transport double that records every call
#[derive(Default)]
pub struct FakeTransport {
    pub started: Mutex<Vec<(TaskId, TransferRequest)>>,
    pub resumed: Mutex<Vec<(TaskId, String, ResumeToken)>>,
    pub paused: Mutex<Vec<TaskId>>,
    pub cancelled: Mutex<Vec<TaskId>>,
    pub discarded: Mutex<Vec<ResumeToken>>,
    pub running: Mutex<Vec<TaskSnapshot>>,
    pub salvageable: Mutex<HashMap<String, ResumeToken>>,
    pub refuse: Mutex<bool>,
}

impl FakeTransport {
    pub fn last_started(&self) -> (TaskId, TransferRequest) {
        self.started.lock().last().cloned().unwrap()
    }

    pub fn last_resumed(&self) -> (TaskId, String, ResumeToken) {
        self.resumed.lock().last().cloned().unwrap()
    }
}

impl Transport for FakeTransport {
    fn start(&self, request: TransferRequest) -> DownloadResult<TaskId> {
        if *self.refuse.lock() {
            return Err(DownloadError::ConfigurationError {
                reason: "refused".to_string(),
            });
        }
        let task = TaskId::next();
        self.started.lock().push((task, request));
        Ok(task)
    }

    fn resume(&self, identifier: &str, token: &ResumeToken) -> DownloadResult<TaskId> {
        if *self.refuse.lock() {
            return Err(DownloadError::InvalidResumeToken {
                reason: "refused".to_string(),
            });
        }
        let task = TaskId::next();
        self.resumed
            .lock()
            .push((task, identifier.to_string(), token.clone()));
        Ok(task)
    }

    fn pause(&self, task: TaskId) {
        self.paused.lock().push(task);
    }

    fn cancel(&self, task: TaskId) {
        self.cancelled.lock().push(task);
    }

    fn discard(&self, token: &ResumeToken) {
        self.discarded.lock().push(token.clone());
    }

    fn tasks(&self) -> Vec<TaskSnapshot> {
        self.running.lock().clone()
    }

    fn salvage(&self, request: &TransferRequest) -> Option<ResumeToken> {
        self.salvageable.lock().remove(&request.identifier)
    }
}

/// Records notifier and content-store calls
#[derive(Default)]
pub struct Recorder {
    pub permission_requests: Mutex<usize>,
    pub completed: Mutex<Vec<(String, String)>>,
    pub failed: Mutex<Vec<(String, String)>>,
    pub ready: Mutex<Vec<(String, PathBuf)>>,
}

impl Notifier for Recorder {
    fn request_permission(&self) {
        *self.permission_requests.lock() += 1;
    }

    fn download_completed(&self, identifier: &str, title: &str) {
        self.completed
            .lock()
            .push((identifier.to_string(), title.to_string()));
    }

    fn download_failed(&self, identifier: &str, description: &str) {
        self.failed
            .lock()
            .push((identifier.to_string(), description.to_string()));
    }
}

impl ContentStore for Recorder {
    fn content_ready(&self, identifier: &str, path: &Path) {
        self.ready
            .lock()
            .push((identifier.to_string(), path.to_path_buf()));
    }
}

pub struct Harness {
    pub coordinator: TransferCoordinator,
    pub transport: Arc<FakeTransport>,
    pub recorder: Arc<Recorder>,
    pub store: Arc<StateStore>,
    pub temp_dir: TempDir,
}

pub const META_URL: &str = "https://download.kiwix.org/zim/wikipedia_en_100.zim.meta4";

/// Create a coordinator over a two-item catalog
pub fn create_harness() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let catalog = Arc::new(JsonCatalog::in_memory(vec![
        CatalogEntry::new("wiki", META_URL, 1000).with_display_name("Wikipedia"),
        CatalogEntry::new("gutenberg", "https://download.kiwix.org/zim/gutenberg.zim", 0),
    ]));
    let transport = Arc::new(FakeTransport::default());
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(StateStore::in_memory());
    let config = CoordinatorConfig::default().with_content_dir(temp_dir.path().join("content"));
    let hooks = CompletionHooks::new(&config.content_dir, recorder.clone(), recorder.clone());
    let coordinator =
        TransferCoordinator::new(config, catalog, store.clone(), transport.clone(), hooks);

    Harness {
        coordinator,
        transport,
        recorder,
        store,
        temp_dir,
    }
}

fn meta_url() -> Url {
    Url::parse(META_URL).unwrap()
}

fn token(bytes: &[u8]) -> ResumeToken {
    ResumeToken::from_bytes(bytes.to_vec())
}

fn progress(task: TaskId, identifier: &str, written: u64, expected: Option<u64>) -> TransportEvent {
    TransportEvent::Progress {
        task,
        identifier: identifier.to_string(),
        bytes_written: written,
        bytes_expected: expected,
    }
}

fn completed(task: TaskId, identifier: &str, completion: TransferCompletion) -> TransportEvent {
    TransportEvent::Completed {
        task,
        identifier: identifier.to_string(),
        completion,
    }
}

fn cancelled_with(resume_data: Option<ResumeToken>) -> TransferCompletion {
    TransferCompletion::failed(
        TransportError::new(TransportErrorKind::Cancelled).with_resume_data(resume_data),
    )
}

/// Test that start strips the metadata suffix and seeds the record
#[tokio::test]
async fn test_start_strips_metadata_suffix() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();

    let (_, request) = h.transport.last_started();
    assert_eq!(
        request.url.as_str(),
        "https://download.kiwix.org/zim/wikipedia_en_100.zim"
    );
    assert_eq!(request.expected_bytes, 1000);

    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 0);
    assert_eq!(record.bytes_expected, 1000);
    assert!(record.resume_token.is_none());
    assert!(h.coordinator.is_active("wiki").await);
    assert_eq!(*h.recorder.permission_requests.lock(), 1);
}

/// Test a full successful transfer
///
/// Progress at 0, 40 and 100 percent is mirrored into the record, then the
/// completion relocates the file, removes the record and announces it.
#[tokio::test]
async fn test_successful_round_trip() {
    let h = create_harness();
    let mut handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, request) = h.transport.last_started();

    for written in [0, 400, 1000] {
        h.coordinator
            .handle_event(progress(task, "wiki", written, Some(1000)))
            .await;
        let record = h.store.get("wiki").await.unwrap();
        assert_eq!(record.bytes_downloaded, written);
        assert_eq!(record.bytes_expected, 1000);

        let update = handle.next_progress().await.unwrap();
        assert_eq!(update.bytes_downloaded, written);
    }

    let staged = h.temp_dir.path().join("wiki.part");
    tokio::fs::write(&staged, b"archive").await.unwrap();
    let file = DownloadedFile {
        path: staged,
        suggested_filename: None,
        url: request.url.clone(),
    };
    h.coordinator
        .handle_event(completed(task, "wiki", TransferCompletion::succeeded(200, file)))
        .await;

    let expected_path = h.temp_dir.path().join("content").join("wikipedia_en_100.zim");
    assert_eq!(
        handle.wait().await,
        TransferOutcome::Completed {
            path: Some(expected_path.clone())
        }
    );
    assert!(h.store.get("wiki").await.is_none());
    assert!(!h.coordinator.is_active("wiki").await);
    assert_eq!(
        *h.recorder.ready.lock(),
        vec![("wiki".to_string(), expected_path.clone())]
    );
    assert_eq!(
        *h.recorder.completed.lock(),
        vec![("wiki".to_string(), "Wikipedia".to_string())]
    );
    assert_eq!(tokio::fs::read(expected_path).await.unwrap(), b"archive");
}

/// Test that progress without a size keeps the size from the record
#[tokio::test]
async fn test_progress_without_size_keeps_expected() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    h.coordinator
        .handle_event(progress(task, "wiki", 250, None))
        .await;
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 250);
    assert_eq!(record.bytes_expected, 1000);
}

/// Test that a size smaller than the progress is stored as unknown
#[tokio::test]
async fn test_progress_past_expected_size() {
    let h = create_harness();
    let mut handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    h.coordinator
        .handle_event(progress(task, "wiki", 1500, Some(1000)))
        .await;
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 1500);
    assert_eq!(record.bytes_expected, 0);
    assert_eq!(handle.next_progress().await.unwrap().bytes_expected, 0);
}

/// Test pause followed by resume and completion
///
/// The acknowledgement stores the token and ends the attempt, and the
/// trailing cancellation from the transport is ignored. Resume hands the same
/// token back and clears it from the record. Progress then carries on from
/// the paused byte count until the resumed attempt finishes.
#[tokio::test]
async fn test_pause_resume_round_trip() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    h.coordinator
        .handle_event(progress(task, "wiki", 400, Some(1000)))
        .await;

    assert!(h.coordinator.pause("wiki").await);
    assert!(!h.coordinator.pause("wiki").await);
    assert_eq!(*h.transport.paused.lock(), vec![task]);

    h.coordinator
        .handle_event(TransportEvent::Paused {
            task,
            identifier: "wiki".to_string(),
            bytes_written: 400,
            resume_data: Some(token(b"T1")),
        })
        .await;
    assert_eq!(handle.wait().await, TransferOutcome::Paused);

    h.coordinator
        .handle_event(completed(task, "wiki", cancelled_with(Some(token(b"T2")))))
        .await;

    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.resume_token, Some(token(b"T1")));
    assert_eq!(record.bytes_downloaded, 400);
    assert!(record.last_error.is_none());
    assert_eq!(
        h.coordinator.status("wiki").await.unwrap().state,
        DisplayState::Paused
    );

    let mut resumed = h.coordinator.resume("wiki").await.unwrap();
    let (resumed_task, identifier, resumed_token) = h.transport.last_resumed();
    assert_ne!(resumed_task, task);
    assert_eq!(identifier, "wiki");
    assert_eq!(resumed_token, token(b"T1"));

    let record = h.store.get("wiki").await.unwrap();
    assert!(record.resume_token.is_none());
    assert_eq!(record.bytes_downloaded, 400);
    assert!(h.coordinator.is_active("wiki").await);

    h.coordinator
        .handle_event(progress(resumed_task, "wiki", 600, Some(1000)))
        .await;
    let record = h.store.get("wiki").await.unwrap();
    assert!(record.bytes_downloaded >= 400);
    assert_eq!(record.bytes_downloaded, 600);
    assert_eq!(record.bytes_expected, 1000);
    assert_eq!(resumed.next_progress().await.unwrap().bytes_downloaded, 600);

    // Late events from the paused attempt change nothing
    h.coordinator
        .handle_event(progress(task, "wiki", 100, Some(1000)))
        .await;
    assert_eq!(h.store.get("wiki").await.unwrap().bytes_downloaded, 600);

    let staged = h.temp_dir.path().join("wiki.part");
    tokio::fs::write(&staged, b"archive").await.unwrap();
    let file = DownloadedFile {
        path: staged,
        suggested_filename: None,
        url: Url::parse("https://download.kiwix.org/zim/wikipedia_en_100.zim").unwrap(),
    };
    h.coordinator
        .handle_event(completed(
            resumed_task,
            "wiki",
            TransferCompletion::succeeded(206, file),
        ))
        .await;

    assert!(matches!(
        resumed.wait().await,
        TransferOutcome::Completed { path: Some(_) }
    ));
    assert!(h.store.get("wiki").await.is_none());
    assert!(!h.coordinator.is_active("wiki").await);
}

/// Test that a pause acknowledgement stores the bytes the token resumes from
///
/// Progress events are throttled, so the last one can lag behind the data
/// the attempt actually wrote before stopping.
#[tokio::test]
async fn test_pause_acknowledgement_records_final_bytes() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    h.coordinator
        .handle_event(progress(task, "wiki", 400, Some(1000)))
        .await;

    h.coordinator.pause("wiki").await;
    h.coordinator
        .handle_event(TransportEvent::Paused {
            task,
            identifier: "wiki".to_string(),
            bytes_written: 455,
            resume_data: Some(token(b"T")),
        })
        .await;
    assert_eq!(handle.wait().await, TransferOutcome::Paused);

    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 455);
    assert_eq!(record.bytes_expected, 1000);
    assert_eq!(record.resume_token, Some(token(b"T")));
    assert!(!h.store.is_dirty());
}

/// Test pause confirmed by the completion alone
#[tokio::test]
async fn test_pause_confirmed_by_completion() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    h.coordinator.pause("wiki").await;
    h.coordinator
        .handle_event(completed(task, "wiki", cancelled_with(Some(token(b"T")))))
        .await;

    assert_eq!(handle.wait().await, TransferOutcome::Paused);
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.resume_token, Some(token(b"T")));
    assert!(record.last_error.is_none());
}

/// Test a transfer that cannot pause
///
/// An empty acknowledgement clears the pending flag so a later pause is
/// issued again.
#[tokio::test]
async fn test_empty_pause_acknowledgement() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    assert!(h.coordinator.pause("wiki").await);
    h.coordinator
        .handle_event(TransportEvent::Paused {
            task,
            identifier: "wiki".to_string(),
            bytes_written: 0,
            resume_data: None,
        })
        .await;

    assert!(h.coordinator.is_active("wiki").await);
    assert!(h.store.get("wiki").await.unwrap().resume_token.is_none());
    assert!(h.coordinator.pause("wiki").await);
    assert_eq!(h.transport.paused.lock().len(), 2);
}

/// Test that pausing an idle item does nothing
#[tokio::test]
async fn test_pause_without_transfer_is_noop() {
    let h = create_harness();
    assert!(!h.coordinator.pause("wiki").await);
    assert!(h.transport.paused.lock().is_empty());
    assert!(h.store.get("wiki").await.is_none());
}

/// Test cancellation of a running transfer
#[tokio::test]
async fn test_cancel_active_transfer() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    h.coordinator
        .handle_event(progress(task, "wiki", 100, Some(1000)))
        .await;

    h.coordinator.cancel("wiki").await;
    assert!(h.store.get("wiki").await.is_none());
    assert_eq!(*h.transport.cancelled.lock(), vec![task]);
    assert_eq!(handle.wait().await, TransferOutcome::Cancelled);

    h.coordinator
        .handle_event(completed(task, "wiki", cancelled_with(None)))
        .await;
    assert!(h.store.get("wiki").await.is_none());
    assert!(h.recorder.failed.lock().is_empty());
}

/// Test cancellation of a paused transfer discards its token
#[tokio::test]
async fn test_cancel_paused_transfer() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    h.coordinator.pause("wiki").await;
    h.coordinator
        .handle_event(completed(task, "wiki", cancelled_with(Some(token(b"T")))))
        .await;

    h.coordinator.cancel("wiki").await;
    assert!(h.store.get("wiki").await.is_none());
    assert_eq!(*h.transport.discarded.lock(), vec![token(b"T")]);
    assert!(h.transport.cancelled.lock().is_empty());
}

/// Test that events from an earlier attempt are ignored
#[tokio::test]
async fn test_stale_events_are_ignored() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    let stale = TaskId::new(task.raw() + 10_000);

    h.coordinator
        .handle_event(progress(stale, "wiki", 900, Some(1000)))
        .await;
    h.coordinator
        .handle_event(completed(stale, "wiki", TransferCompletion::rejected(500)))
        .await;

    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 0);
    assert!(record.last_error.is_none());
    assert!(h.coordinator.is_active("wiki").await);

    h.coordinator
        .handle_event(progress(task, "gutenberg", 5, None))
        .await;
    assert!(h.store.get("gutenberg").await.is_none());
}

/// Test a server rejection
///
/// A non-2xx status deletes the record and reports the failure.
#[tokio::test]
async fn test_rejected_status_removes_record() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    h.coordinator
        .handle_event(completed(task, "wiki", TransferCompletion::rejected(404)))
        .await;

    assert_eq!(
        handle.wait().await,
        TransferOutcome::Failed {
            message: "The server responded with HTTP 404.".to_string()
        }
    );
    assert!(h.store.get("wiki").await.is_none());
    assert_eq!(h.recorder.failed.lock().len(), 1);
}

/// Test a resumable network failure
#[tokio::test]
async fn test_interrupted_transfer_keeps_token_and_error() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();
    h.coordinator
        .handle_event(progress(task, "wiki", 600, Some(1000)))
        .await;

    let error = TransportError::new(TransportErrorKind::ConnectionLost)
        .with_resume_data(Some(token(b"T")));
    h.coordinator
        .handle_event(completed(task, "wiki", TransferCompletion::failed(error)))
        .await;

    assert!(matches!(handle.wait().await, TransferOutcome::Interrupted { .. }));
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.resume_token, Some(token(b"T")));
    assert_eq!(
        record.last_error.as_deref(),
        Some("The network connection was lost.")
    );
    assert!(h.coordinator.status("wiki").await.unwrap().state.can_resume());
    assert!(h.recorder.failed.lock().is_empty());

    let _handle = h.coordinator.resume("wiki").await.unwrap();
    let record = h.store.get("wiki").await.unwrap();
    assert!(record.last_error.is_none());
    assert!(record.resume_token.is_none());
}

/// Test a failure with nothing to resume from
///
/// The record stays with its error; resume is refused and a fresh start
/// clears the error.
#[tokio::test]
async fn test_terminal_failure() {
    let h = create_harness();
    let handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let (task, _) = h.transport.last_started();

    let error = TransportError::new(TransportErrorKind::CannotFindHost);
    h.coordinator
        .handle_event(completed(task, "wiki", TransferCompletion::failed(error)))
        .await;

    assert!(matches!(handle.wait().await, TransferOutcome::Failed { .. }));
    let record = h.store.get("wiki").await.unwrap();
    assert!(record.resume_token.is_none());
    assert!(record.last_error.is_some());
    assert_eq!(h.recorder.failed.lock().len(), 1);

    let result = h.coordinator.resume("wiki").await;
    assert!(matches!(result, Err(DownloadError::NotPaused { .. })));

    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    assert!(h.store.get("wiki").await.unwrap().last_error.is_none());
}

/// Test misuse of start
#[tokio::test]
async fn test_start_misuse() {
    let h = create_harness();
    let url = Url::parse("https://example.org/unknown.zim").unwrap();
    let result = h.coordinator.start("unknown", &url, true).await;
    assert!(matches!(result, Err(DownloadError::UnknownItem { .. })));
    assert!(h.store.get("unknown").await.is_none());

    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    let result = h.coordinator.start("wiki", &meta_url(), true).await;
    assert!(matches!(result, Err(DownloadError::AlreadyActive { .. })));
    assert_eq!(h.transport.started.lock().len(), 1);

    let result = h.coordinator.resume("wiki").await;
    assert!(matches!(result, Err(DownloadError::AlreadyActive { .. })));
}

/// Test that a refused start leaves no record behind
#[tokio::test]
async fn test_refused_start_removes_record() {
    let h = create_harness();
    *h.transport.refuse.lock() = true;
    tokio_test::assert_err!(h.coordinator.start("wiki", &meta_url(), true).await);
    assert!(h.store.get("wiki").await.is_none());
    assert!(!h.coordinator.is_active("wiki").await);
}

/// Test that a refused resume keeps the token
#[tokio::test]
async fn test_refused_resume_keeps_token() {
    let h = create_harness();
    h.store.create("wiki", 1000).await;
    h.store.set_resume_token("wiki", token(b"T")).await;

    *h.transport.refuse.lock() = true;
    tokio_test::assert_err!(h.coordinator.resume("wiki").await);
    assert_eq!(
        h.store.get("wiki").await.unwrap().resume_token,
        Some(token(b"T"))
    );
}

/// Test that starting over a paused item discards its partial data
#[tokio::test]
async fn test_start_over_paused_item_discards_token() {
    let h = create_harness();
    h.store.create("wiki", 1000).await;
    h.store.upsert("wiki", 500, 1000).await;
    h.store.set_resume_token("wiki", token(b"T")).await;

    let _handle = h.coordinator.start("wiki", &meta_url(), true).await.unwrap();
    assert_eq!(*h.transport.discarded.lock(), vec![token(b"T")]);
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 0);
    assert!(record.resume_token.is_none());
}

/// Test relaunch recovery
///
/// Running transport tasks are reattached; orphaned records are salvaged,
/// marked interrupted, or dropped when the catalog no longer has them.
#[tokio::test]
async fn test_restart_monitoring() {
    let h = create_harness();
    let running = TaskId::next();
    h.transport.running.lock().push(TaskSnapshot {
        task: running,
        identifier: "wiki".to_string(),
        bytes_written: 300,
        bytes_expected: Some(1000),
    });
    h.store.create("gutenberg", 0).await;
    h.store.create("removed", 10).await;
    h.store.create("paused", 10).await;
    h.store.set_resume_token("paused", token(b"P")).await;
    h.transport
        .salvageable
        .lock()
        .insert("gutenberg".to_string(), token(b"S"));

    assert_eq!(h.coordinator.restart_monitoring_if_needed().await, 1);

    assert!(h.coordinator.is_active("wiki").await);
    let record = h.store.get("wiki").await.unwrap();
    assert_eq!(record.bytes_downloaded, 300);
    assert_eq!(record.bytes_expected, 1000);

    assert_eq!(
        h.store.get("gutenberg").await.unwrap().resume_token,
        Some(token(b"S"))
    );
    assert!(h.store.get("removed").await.is_none());
    assert_eq!(
        h.store.get("paused").await.unwrap().resume_token,
        Some(token(b"P"))
    );

    h.coordinator
        .handle_event(progress(running, "wiki", 700, None))
        .await;
    assert_eq!(h.store.get("wiki").await.unwrap().bytes_downloaded, 700);

    assert_eq!(h.coordinator.restart_monitoring_if_needed().await, 0);
}

/// Test that an orphan without partial data is marked interrupted
#[tokio::test]
async fn test_restart_marks_lost_transfer() {
    let h = create_harness();
    h.store.create("wiki", 1000).await;

    h.coordinator.restart_monitoring_if_needed().await;

    let status = h.coordinator.status("wiki").await.unwrap();
    assert_eq!(
        status.state,
        DisplayState::Failed {
            message: INTERRUPTED_MESSAGE.to_string()
        }
    );
}

/// Test status listing with reachability
#[tokio::test]
async fn test_statuses_follow_reachability() {
    let h = create_harness();
    let (network_tx, network_rx) = tokio::sync::watch::channel(ReachabilityState::Online);
    let coordinator = h.coordinator.with_reachability(network_rx);

    let _handle = coordinator.start("wiki", &meta_url(), true).await.unwrap();
    h.store.create("gutenberg", 0).await;
    h.store.set_resume_token("gutenberg", token(b"G")).await;

    let statuses = coordinator.statuses().await;
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].identifier, "gutenberg");
    assert_eq!(statuses[0].state, DisplayState::Paused);
    assert_eq!(statuses[1].state, DisplayState::Downloading);

    network_tx.send(ReachabilityState::Offline).unwrap();
    let statuses = coordinator.statuses().await;
    assert!(statuses
        .iter()
        .all(|status| status.state == DisplayState::WaitingForNetwork));
}

/// Test that metered permission is capped by configuration
#[tokio::test]
async fn test_metered_permission() {
    let h = create_harness();
    let _handle = h.coordinator.start("wiki", &meta_url(), false).await.unwrap();
    assert!(!h.transport.last_started().1.allow_metered);
}
