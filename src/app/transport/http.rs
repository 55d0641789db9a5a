//! Range-resumable HTTP transport
//!
//! Each attempt streams into its own `<partial_dir>/<identifier>.<pid>-<task>.part`
//! on its own tokio task, so a late cleanup by a cancelled attempt never
//! touches the file of a newer attempt for the same item. A resume token is a small JSON document naming the URL, the
//! partial file and the byte offset; resuming sends `Range: bytes=<offset>-`
//! guarded by `If-Range` when the server supplied a validator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, ETAG, IF_RANGE, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    DownloadedFile, TaskId, TaskSnapshot, TransferCompletion, Transport, TransportError,
    TransportErrorKind, TransportEvent,
};
use crate::app::client::ClientConfig;
use crate::app::models::{ResumeToken, TransferRequest};
use crate::constants::transfer;
use crate::errors::{DownloadError, DownloadResult};

/// Settings for [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Where partial files live until completion
    pub partial_dir: PathBuf,
    /// Minimum spacing of progress events per transfer
    pub progress_interval: Duration,
    pub client: ClientConfig,
}

impl TransportConfig {
    pub fn new(partial_dir: impl Into<PathBuf>) -> Self {
        Self {
            partial_dir: partial_dir.into(),
            progress_interval: transfer::PROGRESS_EVENT_INTERVAL,
            client: ClientConfig::default(),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel,
}

struct TaskEntry {
    identifier: String,
    control: watch::Sender<Control>,
    bytes_written: Arc<AtomicU64>,
    /// Zero while unknown
    bytes_expected: Arc<AtomicU64>,
}

/// Contents of a resume token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ResumeState {
    url: String,
    partial_path: PathBuf,
    bytes_received: u64,
    bytes_expected: Option<u64>,
    validator: Option<String>,
    allow_metered: bool,
}

impl ResumeState {
    fn encode(&self) -> Option<ResumeToken> {
        serde_json::to_vec(self).ok().map(ResumeToken::from_bytes)
    }

    fn decode(token: &ResumeToken) -> DownloadResult<Self> {
        serde_json::from_slice(token.as_bytes()).map_err(|e| DownloadError::InvalidResumeToken {
            reason: e.to_string(),
        })
    }
}

/// Everything a transfer task needs
struct TransferJob {
    task: TaskId,
    identifier: String,
    url: Url,
    partial_path: PathBuf,
    offset: u64,
    validator: Option<String>,
    expected_hint: Option<u64>,
    allow_metered: bool,
    bytes_written: Arc<AtomicU64>,
    bytes_expected: Arc<AtomicU64>,
}

impl TransferJob {
    fn resume_token(&self, bytes_received: u64, validator: Option<String>) -> Option<ResumeToken> {
        ResumeState {
            url: self.url.to_string(),
            partial_path: self.partial_path.clone(),
            bytes_received,
            bytes_expected: self.known_expected(),
            validator,
            allow_metered: self.allow_metered,
        }
        .encode()
    }

    fn known_expected(&self) -> Option<u64> {
        match self.bytes_expected.load(Ordering::SeqCst) {
            0 => self.expected_hint,
            n => Some(n),
        }
    }
}

/// How a transfer task ended
enum Outcome {
    Finished { status: u16, file: DownloadedFile },
    Rejected { status: u16 },
    Paused { token: Option<ResumeToken> },
    Cancelled,
    Failed(TransportError),
}

#[derive(Clone)]
struct Shared {
    client: Client,
    events: mpsc::Sender<TransportEvent>,
    tasks: Arc<Mutex<HashMap<TaskId, TaskEntry>>>,
    progress_interval: Duration,
}

/// Transport backed by reqwest streaming GETs
pub struct HttpTransport {
    shared: Shared,
    partial_dir: PathBuf,
}

impl HttpTransport {
    /// Create a transport reporting on `events`
    pub fn new(config: TransportConfig, events: mpsc::Sender<TransportEvent>) -> DownloadResult<Self> {
        let client = config.client.build_transfer_client()?;
        Ok(Self {
            shared: Shared {
                client,
                events,
                tasks: Arc::new(Mutex::new(HashMap::new())),
                progress_interval: config.progress_interval,
            },
            partial_dir: config.partial_dir,
        })
    }

    /// Partial file written by attempt `task` of `identifier`
    pub fn partial_path(&self, identifier: &str, task: TaskId) -> PathBuf {
        self.partial_dir.join(format!(
            "{}.{}-{}{}",
            sanitize_identifier(identifier),
            std::process::id(),
            task.raw(),
            transfer::PARTIAL_FILE_SUFFIX
        ))
    }

    /// Largest non-empty partial file left behind by any attempt of `identifier`
    pub fn find_partial(&self, identifier: &str) -> Option<(PathBuf, u64)> {
        let prefix = format!("{}.", sanitize_identifier(identifier));
        let entries = std::fs::read_dir(&self.partial_dir).ok()?;

        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.strip_prefix(prefix.as_str()))
                    .and_then(|rest| rest.strip_suffix(transfer::PARTIAL_FILE_SUFFIX))
                    .is_some_and(is_attempt_tag)
            })
            .filter_map(|entry| {
                let len = entry.metadata().ok()?.len();
                (len > 0).then(|| (entry.path(), len))
            })
            .max_by_key(|(_, len)| *len)
    }

    fn spawn(&self, task: TaskId, job_parts: JobParts) {
        let (control, control_rx) = watch::channel(Control::Run);
        let bytes_written = Arc::new(AtomicU64::new(job_parts.offset));
        let bytes_expected = Arc::new(AtomicU64::new(job_parts.expected_hint.unwrap_or(0)));

        self.shared.tasks.lock().insert(
            task,
            TaskEntry {
                identifier: job_parts.identifier.clone(),
                control,
                bytes_written: bytes_written.clone(),
                bytes_expected: bytes_expected.clone(),
            },
        );

        let job = TransferJob {
            task,
            identifier: job_parts.identifier,
            url: job_parts.url,
            partial_path: job_parts.partial_path,
            offset: job_parts.offset,
            validator: job_parts.validator,
            expected_hint: job_parts.expected_hint,
            allow_metered: job_parts.allow_metered,
            bytes_written,
            bytes_expected,
        };

        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_transfer(shared, job, control_rx).await;
        });
    }

    fn send_control(&self, task: TaskId, control: Control) {
        match self.shared.tasks.lock().get(&task) {
            Some(entry) => {
                let _ = entry.control.send(control);
            }
            None => debug!("{:?} requested for finished {}", control, task),
        }
    }
}

struct JobParts {
    identifier: String,
    url: Url,
    partial_path: PathBuf,
    offset: u64,
    validator: Option<String>,
    expected_hint: Option<u64>,
    allow_metered: bool,
}

impl Transport for HttpTransport {
    fn start(&self, request: TransferRequest) -> DownloadResult<TaskId> {
        if !request.allow_metered {
            debug!(
                "{} restricted to unmetered networks; metering is not detectable here",
                request.identifier
            );
        }
        let task = TaskId::next();
        let partial_path = self.partial_path(&request.identifier, task);
        self.spawn(task, JobParts {
            identifier: request.identifier.clone(),
            url: request.url,
            partial_path,
            offset: 0,
            validator: None,
            expected_hint: (request.expected_bytes > 0).then_some(request.expected_bytes),
            allow_metered: request.allow_metered,
        });
        info!("Started {} for {}", task, request.identifier);
        Ok(task)
    }

    fn resume(&self, identifier: &str, token: &ResumeToken) -> DownloadResult<TaskId> {
        let state = ResumeState::decode(token)?;
        let url = Url::parse(&state.url).map_err(|e| DownloadError::InvalidUrl {
            url: state.url.clone(),
            error: e.to_string(),
        })?;

        // Never trust the token beyond what is actually on disk
        let on_disk = std::fs::metadata(&state.partial_path)
            .map(|meta| meta.len())
            .unwrap_or(0);
        let offset = state.bytes_received.min(on_disk);
        let validator = if offset == state.bytes_received {
            state.validator
        } else {
            None
        };

        let task = TaskId::next();
        self.spawn(task, JobParts {
            identifier: identifier.to_string(),
            url,
            partial_path: state.partial_path,
            offset,
            validator,
            expected_hint: state.bytes_expected,
            allow_metered: state.allow_metered,
        });
        info!("Resumed {} for {} at byte {}", task, identifier, offset);
        Ok(task)
    }

    fn pause(&self, task: TaskId) {
        self.send_control(task, Control::Pause);
    }

    fn cancel(&self, task: TaskId) {
        self.send_control(task, Control::Cancel);
    }

    fn discard(&self, token: &ResumeToken) {
        match ResumeState::decode(token) {
            Ok(state) => match std::fs::remove_file(&state.partial_path) {
                Ok(()) => debug!("Discarded {}", state.partial_path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not discard {}: {}", state.partial_path.display(), e),
            },
            Err(e) => debug!("Ignoring undecodable token on discard: {}", e),
        }
    }

    fn tasks(&self) -> Vec<TaskSnapshot> {
        self.shared
            .tasks
            .lock()
            .iter()
            .map(|(task, entry)| TaskSnapshot {
                task: *task,
                identifier: entry.identifier.clone(),
                bytes_written: entry.bytes_written.load(Ordering::SeqCst),
                bytes_expected: match entry.bytes_expected.load(Ordering::SeqCst) {
                    0 => None,
                    n => Some(n),
                },
            })
            .collect()
    }

    fn salvage(&self, request: &TransferRequest) -> Option<ResumeToken> {
        let (partial_path, len) = self.find_partial(&request.identifier)?;
        debug!(
            "Salvaging {} bytes of {} from {}",
            len,
            request.identifier,
            partial_path.display()
        );
        ResumeState {
            url: request.url.to_string(),
            partial_path,
            bytes_received: len,
            bytes_expected: (request.expected_bytes > 0).then_some(request.expected_bytes),
            validator: None,
            allow_metered: request.allow_metered,
        }
        .encode()
    }
}

async fn run_transfer(shared: Shared, job: TransferJob, mut control_rx: watch::Receiver<Control>) {
    let outcome = transfer(&shared, &job, &mut control_rx).await;

    let completion = match outcome {
        Outcome::Finished { status, file } => TransferCompletion::succeeded(status, file),
        Outcome::Rejected { status } => {
            remove_partial(&job.partial_path).await;
            TransferCompletion::rejected(status)
        }
        Outcome::Paused { token } => {
            let _ = shared
                .events
                .send(TransportEvent::Paused {
                    task: job.task,
                    identifier: job.identifier.clone(),
                    bytes_written: job.bytes_written.load(Ordering::SeqCst),
                    resume_data: token.clone(),
                })
                .await;
            TransferCompletion::failed(
                TransportError::new(TransportErrorKind::Cancelled).with_resume_data(token),
            )
        }
        Outcome::Cancelled => {
            remove_partial(&job.partial_path).await;
            TransferCompletion::failed(TransportError::new(TransportErrorKind::Cancelled))
        }
        Outcome::Failed(error) => TransferCompletion::failed(error),
    };

    shared.tasks.lock().remove(&job.task);
    let _ = shared
        .events
        .send(TransportEvent::Completed {
            task: job.task,
            identifier: job.identifier.clone(),
            completion,
        })
        .await;
}

async fn transfer(
    shared: &Shared,
    job: &TransferJob,
    control_rx: &mut watch::Receiver<Control>,
) -> Outcome {
    let mut request = shared.client.get(job.url.as_str());
    if job.offset > 0 {
        request = request.header(RANGE, format!("bytes={}-", job.offset));
        if let Some(validator) = &job.validator {
            request = request.header(IF_RANGE, validator.as_str());
        }
    }

    let response = tokio::select! {
        response = request.send() => response,
        control = next_stop(control_rx) => {
            return match control {
                Control::Pause => Outcome::Paused {
                    token: job.resume_token(job.offset, job.validator.clone()),
                },
                _ => Outcome::Cancelled,
            };
        }
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            let token = (job.offset > 0)
                .then(|| job.resume_token(job.offset, job.validator.clone()))
                .flatten();
            return Outcome::Failed(classify_error(&e).with_resume_data(token));
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!("{} answered HTTP {}", job.url, status);
        return Outcome::Rejected {
            status: status.as_u16(),
        };
    }

    let appending = job.offset > 0 && status == StatusCode::PARTIAL_CONTENT;
    if job.offset > 0 && !appending {
        info!("{} ignored the range request, restarting from zero", job.url);
    }
    let mut written = if appending { job.offset } else { 0 };

    let headers = response.headers();
    let accepts_ranges = appending
        || headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
    let validator = headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let suggested_filename = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition);
    let expected = response
        .content_length()
        .map(|len| len + written)
        .or(job.expected_hint);
    job.bytes_expected.store(expected.unwrap_or(0), Ordering::SeqCst);
    job.bytes_written.store(written, Ordering::SeqCst);

    let mut file = match open_partial(&job.partial_path, appending).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open {}: {}", job.partial_path.display(), e);
            return Outcome::Failed(TransportError::new(TransportErrorKind::CannotWriteFile));
        }
    };

    emit_progress(shared, job, written, expected).await;
    let mut last_emit = Instant::now();
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            biased;
            control = next_stop(control_rx) => {
                match control {
                    Control::Pause if accepts_ranges || written == 0 => {
                        let _ = file.flush().await;
                        return Outcome::Paused {
                            token: job.resume_token(written, validator.clone()),
                        };
                    }
                    Control::Pause => {
                        info!("{} does not support ranges, continuing {}", job.url, job.identifier);
                        let _ = shared
                            .events
                            .send(TransportEvent::Paused {
                                task: job.task,
                                identifier: job.identifier.clone(),
                                bytes_written: written,
                                resume_data: None,
                            })
                            .await;
                    }
                    _ => return Outcome::Cancelled,
                }
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        warn!("Write to {} failed: {}", job.partial_path.display(), e);
                        return Outcome::Failed(TransportError::new(TransportErrorKind::CannotWriteFile));
                    }
                    written += bytes.len() as u64;
                    job.bytes_written.store(written, Ordering::SeqCst);
                    if last_emit.elapsed() >= shared.progress_interval {
                        emit_progress(shared, job, written, expected).await;
                        last_emit = Instant::now();
                    }
                }
                Some(Err(e)) => {
                    let _ = file.flush().await;
                    let token = accepts_ranges
                        .then(|| job.resume_token(written, validator.clone()))
                        .flatten();
                    return Outcome::Failed(classify_error(&e).with_resume_data(token));
                }
                None => break,
            }
        }
    }

    if let Err(e) = file.flush().await {
        warn!("Flush of {} failed: {}", job.partial_path.display(), e);
        return Outcome::Failed(TransportError::new(TransportErrorKind::CannotWriteFile));
    }
    drop(file);

    if let Some(total) = expected {
        if written < total {
            let token = accepts_ranges
                .then(|| job.resume_token(written, validator.clone()))
                .flatten();
            return Outcome::Failed(
                TransportError::new(TransportErrorKind::ConnectionLost).with_resume_data(token),
            );
        }
    }

    emit_progress(shared, job, written, expected).await;
    Outcome::Finished {
        status: status.as_u16(),
        file: DownloadedFile {
            path: job.partial_path.clone(),
            suggested_filename,
            url: job.url.clone(),
        },
    }
}

/// Resolve when a pause or cancel is requested
async fn next_stop(control_rx: &mut watch::Receiver<Control>) -> Control {
    loop {
        if control_rx.changed().await.is_err() {
            return Control::Cancel;
        }
        let control = *control_rx.borrow_and_update();
        if control != Control::Run {
            return control;
        }
    }
}

async fn emit_progress(shared: &Shared, job: &TransferJob, written: u64, expected: Option<u64>) {
    let _ = shared
        .events
        .send(TransportEvent::Progress {
            task: job.task,
            identifier: job.identifier.clone(),
            bytes_written: written,
            bytes_expected: expected,
        })
        .await;
}

async fn open_partial(path: &Path, append: bool) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if append {
        OpenOptions::new().append(true).open(path).await
    } else {
        tokio::fs::File::create(path).await
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

fn classify_error(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        TransportErrorKind::TimedOut
    } else if error.is_connect() {
        let detail = format!("{:?}", error).to_ascii_lowercase();
        if detail.contains("dns") || detail.contains("resolve") || detail.contains("lookup") {
            TransportErrorKind::CannotFindHost
        } else {
            TransportErrorKind::CannotConnect
        }
    } else if error.is_body() || error.is_decode() {
        TransportErrorKind::ConnectionLost
    } else if error.is_request() {
        TransportErrorKind::NotConnected
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind)
}

/// File name from a `Content-Disposition` header
fn parse_content_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|name| !name.is_empty())
}

/// `<pid>-<task>` part of a partial file name
fn is_attempt_tag(tag: &str) -> bool {
    tag.split_once('-').is_some_and(|(pid, task)| {
        [pid, task]
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// Keep identifiers safe for use as file names
fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
