//! Integration tests for the download subsystem
//!
//! These tests run the coordinator, the HTTP transport and the icon fetcher
//! against a wiremock server and check the files and records they leave.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use zim_fetcher::app::{
    BackgroundTaskManager, Catalog, CatalogEntry, ClientConfig, CompletionHooks,
    CoordinatorConfig, DisplayState, FileSettings, HttpHandler, HttpIconSource, HttpTransport,
    IconFetcher, IconFetcherConfig, JsonCatalog, LoggingContentStore, LoggingNotifier,
    StateStore, TaskId, TransferCoordinator, TransferHandle, TransferOutcome, TransferRequest,
    Transport, TransportConfig, TransportEvent,
};

const ARCHIVE_LEN: usize = 64 * 1024;
const WAIT: Duration = Duration::from_secs(15);

/// Coordinator wired to real storage under a temporary directory
struct Harness {
    coordinator: Arc<TransferCoordinator>,
    store: Arc<StateStore>,
    transport: Arc<HttpTransport>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: BackgroundTaskManager,
}

impl Harness {
    async fn open(dir: &Path, catalog: Arc<JsonCatalog>) -> Self {
        let backend = Arc::new(FileSettings::new(dir.join("settings.json")));
        let store = Arc::new(StateStore::open(backend).await.unwrap());

        let (events_tx, events_rx) = mpsc::channel(1024);
        let transport = Arc::new(
            HttpTransport::new(transport_config(dir), events_tx).unwrap(),
        );

        let config = CoordinatorConfig::default()
            .with_content_dir(dir.join("content"))
            .with_persist_interval(Duration::from_millis(50));
        let hooks = CompletionHooks::new(
            &config.content_dir,
            Arc::new(LoggingContentStore),
            Arc::new(LoggingNotifier),
        );
        let coordinator = Arc::new(TransferCoordinator::new(
            config.clone(),
            catalog,
            store.clone(),
            transport.clone(),
            hooks,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = BackgroundTaskManager::new();
        tasks.start_event_loop(coordinator.clone(), events_rx, shutdown_tx.subscribe());
        tasks.start_heartbeat(store.clone(), config.persist_interval, shutdown_tx.subscribe());
        coordinator.restart_monitoring_if_needed().await;

        Self {
            coordinator,
            store,
            transport,
            shutdown_tx,
            tasks,
        }
    }

    async fn close(self) {
        let _ = self.shutdown_tx.send(());
        self.tasks.shutdown_all().await;
    }
}

fn transport_config(dir: &Path) -> TransportConfig {
    TransportConfig::new(dir.join("partial")).with_progress_interval(Duration::from_millis(10))
}

/// Deterministic archive contents
fn archive_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn catalog_for(server: &MockServer) -> Arc<JsonCatalog> {
    Arc::new(JsonCatalog::in_memory([
        CatalogEntry::new(
            "wiki",
            format!("{}/wiki.zim.meta4", server.uri()),
            ARCHIVE_LEN as u64,
        )
        .with_display_name("Wikipedia"),
        CatalogEntry::new("missing", format!("{}/missing.zim", server.uri()), 0),
    ]))
}

fn archive_response(body: &[u8]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_bytes(body.to_vec())
        .insert_header("accept-ranges", "bytes")
        .insert_header("etag", "\"v1\"")
}

/// Serve the whole archive at `/wiki.zim`
async fn mount_archive(server: &MockServer, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/wiki.zim"))
        .respond_with(archive_response(body))
        .mount(server)
        .await;
}

/// Make the first request for `/wiki.zim` wait before answering
async fn mount_slow_first_response(server: &MockServer, body: &[u8], delay: Duration) {
    Mock::given(method("GET"))
        .and(path("/wiki.zim"))
        .respond_with(archive_response(body).set_delay(delay))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
}

async fn requests_for(server: &MockServer, route: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == route)
        .collect()
}

fn range_of(request: &Request) -> Option<String> {
    request
        .headers
        .get("range")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Wait until the server has seen `count` requests
async fn wait_for_requests(server: &MockServer, count: usize) {
    tokio::time::timeout(WAIT, async {
        while server.received_requests().await.unwrap_or_default().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn outcome(handle: TransferHandle) -> TransferOutcome {
    tokio::time::timeout(WAIT, handle.wait()).await.unwrap()
}

fn completed_path(outcome: TransferOutcome) -> std::path::PathBuf {
    match outcome {
        TransferOutcome::Completed { path: Some(path) } => path,
        other => panic!("unexpected outcome: {:?}", other),
    }
}

/// Leave a record and `len` bytes of partial data as a killed process would
async fn leave_interrupted_transfer(dir: &Path, catalog: Arc<JsonCatalog>, body: &[u8], len: usize) {
    let harness = Harness::open(dir, catalog).await;
    harness.store.create("wiki", ARCHIVE_LEN as u64).await;
    let partial = harness.transport.partial_path("wiki", TaskId::new(1));
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    std::fs::write(&partial, &body[..len]).unwrap();
    harness.close().await;
}

/// Test a full download
///
/// The metalink suffix is stripped, the archive lands in the content
/// directory under its URL name and the record is forgotten.
#[tokio::test]
async fn test_download_completes_and_relocates() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(ARCHIVE_LEN);
    let server = MockServer::start().await;
    mount_archive(&server, &body).await;
    let catalog = catalog_for(&server);
    let harness = Harness::open(temp_dir.path(), catalog.clone()).await;

    let url = catalog.entry("wiki").unwrap().url().unwrap();
    let handle = harness.coordinator.start("wiki", &url, true).await.unwrap();

    let path = completed_path(outcome(handle).await);
    assert_eq!(path, temp_dir.path().join("content").join("wiki.zim"));
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert!(harness.store.get("wiki").await.is_none());
    assert!(harness.transport.find_partial("wiki").is_none());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/wiki.zim");
    assert_eq!(range_of(&requests[0]), None);

    harness.close().await;
}

/// Test resuming data left by an interrupted process
///
/// Relaunch turns the partial file into a resume token; resuming asks only
/// for the missing tail and appends it.
#[tokio::test]
async fn test_recovered_partial_resumes_with_range() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(ARCHIVE_LEN);
    let offset = 5000;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wiki.zim"))
        .and(header("range", format!("bytes={}-", offset).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(body[offset..].to_vec())
                .insert_header(
                    "content-range",
                    format!("bytes {}-{}/{}", offset, ARCHIVE_LEN - 1, ARCHIVE_LEN).as_str(),
                )
                .insert_header("accept-ranges", "bytes"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    mount_archive(&server, &body).await;
    let catalog = catalog_for(&server);

    leave_interrupted_transfer(temp_dir.path(), catalog.clone(), &body, offset).await;

    let harness = Harness::open(temp_dir.path(), catalog).await;
    let record = harness.store.get("wiki").await.unwrap();
    assert!(record.is_paused());
    assert!(record.last_error.is_none());
    assert_eq!(
        harness.coordinator.status("wiki").await.unwrap().state,
        DisplayState::Paused
    );

    let handle = harness.coordinator.resume("wiki").await.unwrap();
    let path = completed_path(outcome(handle).await);
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert!(harness.store.get("wiki").await.is_none());

    let requests = requests_for(&server, "/wiki.zim").await;
    assert_eq!(requests.len(), 1);
    assert_eq!(range_of(&requests[0]), Some(format!("bytes={}-", offset)));

    harness.close().await;
}

/// Test that a paused download survives a restart
#[tokio::test]
async fn test_paused_download_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(ARCHIVE_LEN);
    let server = MockServer::start().await;
    mount_slow_first_response(&server, &body, Duration::from_secs(5)).await;
    mount_archive(&server, &body).await;
    let catalog = catalog_for(&server);

    let harness = Harness::open(temp_dir.path(), catalog.clone()).await;
    let url = catalog.entry("wiki").unwrap().url().unwrap();
    let handle = harness.coordinator.start("wiki", &url, true).await.unwrap();
    wait_for_requests(&server, 1).await;

    assert!(harness.coordinator.pause("wiki").await);
    assert_eq!(outcome(handle).await, TransferOutcome::Paused);
    let record = harness.store.get("wiki").await.unwrap();
    assert!(record.is_paused());
    assert_eq!(record.bytes_downloaded, 0);
    harness.close().await;

    let harness = Harness::open(temp_dir.path(), catalog).await;
    let record = harness.store.get("wiki").await.unwrap();
    assert!(record.is_paused());
    assert!(!harness.coordinator.is_active("wiki").await);

    let handle = harness.coordinator.resume("wiki").await.unwrap();
    let path = completed_path(outcome(handle).await);
    assert_eq!(std::fs::read(path).unwrap(), body);
    assert_eq!(requests_for(&server, "/wiki.zim").await.len(), 2);

    harness.close().await;
}

/// Test that an HTTP error ends the attempt for good
#[tokio::test]
async fn test_not_found_is_terminal() {
    let temp_dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.zim"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let catalog = catalog_for(&server);
    let harness = Harness::open(temp_dir.path(), catalog.clone()).await;

    let url = catalog.entry("missing").unwrap().url().unwrap();
    let handle = harness.coordinator.start("missing", &url, true).await.unwrap();

    match outcome(handle).await {
        TransferOutcome::Failed { message } => assert!(message.contains("404")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(harness.store.get("missing").await.is_none());
    assert!(harness.coordinator.resume("missing").await.is_err());

    harness.close().await;
}

/// Test that cancelling a paused item drops the record and the partial file
#[tokio::test]
async fn test_cancel_discards_partial_data() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(ARCHIVE_LEN);
    let server = MockServer::start().await;
    let catalog = catalog_for(&server);
    leave_interrupted_transfer(temp_dir.path(), catalog.clone(), &body, 2048).await;

    let harness = Harness::open(temp_dir.path(), catalog).await;
    assert!(harness.store.get("wiki").await.unwrap().is_paused());
    assert!(harness.transport.find_partial("wiki").is_some());

    harness.coordinator.cancel("wiki").await;
    assert!(harness.store.get("wiki").await.is_none());
    assert!(harness.transport.find_partial("wiki").is_none());
    assert!(server.received_requests().await.unwrap().is_empty());

    harness.close().await;
}

/// Test starting an item again right after cancelling it
///
/// The new attempt must end with the archive in place even though the
/// cancelled one cleans up after it has already begun.
#[tokio::test]
async fn test_restart_after_cancel_delivers_file() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(ARCHIVE_LEN);
    let server = MockServer::start().await;
    mount_slow_first_response(&server, &body, Duration::from_millis(300)).await;
    mount_archive(&server, &body).await;
    let catalog = catalog_for(&server);
    let harness = Harness::open(temp_dir.path(), catalog.clone()).await;

    let url = catalog.entry("wiki").unwrap().url().unwrap();
    let first = harness.coordinator.start("wiki", &url, true).await.unwrap();
    wait_for_requests(&server, 1).await;
    harness.coordinator.cancel("wiki").await;
    let second = harness.coordinator.start("wiki", &url, true).await.unwrap();

    assert_eq!(outcome(first).await, TransferOutcome::Cancelled);
    let path = completed_path(outcome(second).await);
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert!(harness.store.get("wiki").await.is_none());

    harness.close().await;
}

/// Test a cancelled attempt that notices the cancel late
///
/// With a one-slot event channel the first attempt stalls on its progress
/// reports, so it only acts on the cancel after the second attempt for the
/// same item is already writing.
#[tokio::test]
async fn test_late_cancel_leaves_newer_attempt_intact() {
    let temp_dir = TempDir::new().unwrap();
    let body = archive_body(4 * 1024 * 1024);
    let server = MockServer::start().await;
    mount_archive(&server, &body).await;

    let (events_tx, mut events_rx) = mpsc::channel(1);
    let transport = HttpTransport::new(transport_config(temp_dir.path()), events_tx).unwrap();
    let url = url::Url::parse(&format!("{}/wiki.zim", server.uri())).unwrap();
    let request = TransferRequest::new("wiki", &url, body.len() as u64);

    let first = transport.start(request.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    transport.cancel(first);
    let second = transport.start(request).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let completion = tokio::time::timeout(WAIT, async {
        while let Some(event) = events_rx.recv().await {
            if let TransportEvent::Completed {
                task, completion, ..
            } = event
            {
                if task == second {
                    return completion;
                }
            }
        }
        panic!("event channel closed before the second attempt finished");
    })
    .await
    .unwrap();

    assert!(completion.error.is_none());
    let file = completion.file.unwrap();
    assert_ne!(file.path, transport.partial_path("wiki", first));
    assert_eq!(std::fs::read(&file.path).unwrap(), body);
}

/// Test icon fetching against real responses
///
/// Image responses are stored on the catalog; an HTML page is retried and
/// then given up on.
#[tokio::test]
async fn test_icons_are_fetched_and_saved() {
    let temp_dir = TempDir::new().unwrap();
    let icon = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/icon.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(icon.clone(), "image/png"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(b"<html></html>".to_vec(), "text/html"),
        )
        .expect(3)
        .mount(&server)
        .await;

    let catalog_path = temp_dir.path().join("catalog.json");
    let catalog = Arc::new(JsonCatalog::open(&catalog_path).await.unwrap());
    catalog.insert(
        CatalogEntry::new("wiki", "https://x/wiki.zim", 0)
            .with_icon_url(format!("{}/icon.png", server.uri())),
    );
    catalog.insert(
        CatalogEntry::new("broken", "https://x/broken.zim", 0)
            .with_icon_url(format!("{}/page.html", server.uri())),
    );

    let client = ClientConfig::default().build_http_client().unwrap();
    let handler = Arc::new(HttpHandler::new(client, 100).unwrap());
    let fetcher = IconFetcher::new(
        IconFetcherConfig::default().with_retry_delay(Duration::from_millis(10)),
        Arc::new(HttpIconSource::new(handler)),
        catalog.clone(),
    );

    let fetched = tokio::time::timeout(WAIT, fetcher.fetch_missing(catalog.missing_icons()))
        .await
        .unwrap();
    assert_eq!(fetched, 1);
    assert_eq!(fetcher.pending(), 0);

    let reloaded = JsonCatalog::open(&catalog_path).await.unwrap();
    assert_eq!(reloaded.entry("wiki").unwrap().icon, Some(icon));
    assert_eq!(reloaded.entry("broken").unwrap().icon, None);

    assert_eq!(requests_for(&server, "/page.html").await.len(), 3);
    assert_eq!(requests_for(&server, "/icon.png").await.len(), 1);
}
