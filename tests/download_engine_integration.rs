//! Integration tests for the download engine against a mock HTTP server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use harvester_core::{
    AttachmentCandidate, DownloadEngine, FailureKind, HarvestConfig, HttpClient, NetworkFailure,
    RetryPolicy,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

// ==================== Helpers ====================

fn client() -> HttpClient {
    HttpClient::from_config(&HarvestConfig::default()).unwrap()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(10))
}

fn engine(concurrency: usize, policy: RetryPolicy, dir: &TempDir) -> DownloadEngine {
    DownloadEngine::new(concurrency, policy, client(), dir.path().to_path_buf()).unwrap()
}

fn candidate(url: String, title: &str, ordinal: u32, hint: &str) -> AttachmentCandidate {
    AttachmentCandidate {
        url,
        filename_hint: hint.to_string(),
        source_title: title.to_string(),
        source_url: "https://example.com/page".to_string(),
        source_index: 1,
        ordinal,
    }
}

/// Answers 503 until `failures` requests have been seen, then 200 with `body`.
struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    failures: usize,
    body: Vec<u8>,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            ResponseTemplate::new(503).set_body_bytes(b"busy")
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body.clone())
        }
    }
}

/// Tracks peak in-flight requests.
///
/// wiremock's `Respond` is synchronous and runs on the server's own threads,
/// so the blocking sleep keeps requests overlapping without stalling the
/// test runtime.
struct ConcurrencyTrackingResponder {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay_ms: u64,
}

impl Respond for ConcurrencyTrackingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        self.current.fetch_sub(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_bytes(b"content")
    }
}

/// Plain HTTP/1.1 server whose first `broken` responses announce
/// `declared_len` bytes but close the connection after `partial_len`.
/// Later requests get `body` in full. Returns the base URL and a request
/// counter.
fn truncating_server(
    broken: usize,
    declared_len: usize,
    partial_len: usize,
    body: &'static [u8],
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);
    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let mut buf = [0u8; 8192];
            if stream.read(&mut buf).unwrap_or(0) == 0 {
                continue;
            }
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (len, payload) = if n < broken {
                (declared_len, vec![b'x'; partial_len])
            } else {
                (body.len(), body.to_vec())
            };
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&payload);
            let _ = stream.flush();
        }
    });
    (format!("http://127.0.0.1:{port}"), requests)
}

// ==================== Success Path ====================

#[tokio::test]
async fn test_download_writes_body_under_composed_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/budget.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 budget"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let url = format!("{}/files/budget.pdf", server.uri());
    let outcome = engine(2, fast_policy(3), &dir)
        .download_batch(vec![candidate(url, "Annual Report", 1, "Budget")])
        .await
        .unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.materialized.len(), 1);
    let file = &outcome.materialized[0];
    assert_eq!(file.attempts_made, 1);
    assert_eq!(file.bytes_written, 15);
    assert_eq!(
        file.resolved_path,
        dir.path().join("Annual_Report_1_Budget.pdf")
    );
    assert_eq!(
        std::fs::read(&file.resolved_path).unwrap(),
        b"%PDF-1.4 budget"
    );
    assert_eq!(outcome.stats.completed(), 1);
    assert_eq!(outcome.stats.failed(), 0);
}

#[tokio::test]
async fn test_existing_file_is_never_overwritten() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let earlier = dir.path().join("Notice_1_a.pdf");
    std::fs::write(&earlier, b"from an earlier run").unwrap();

    let outcome = engine(1, fast_policy(1), &dir)
        .download_batch(vec![candidate(
            format!("{}/a.pdf", server.uri()),
            "Notice",
            1,
            "a.pdf",
        )])
        .await
        .unwrap();

    assert_eq!(outcome.materialized.len(), 1);
    assert_eq!(
        outcome.materialized[0].resolved_path,
        dir.path().join("Notice_1_a_1.pdf")
    );
    assert_eq!(std::fs::read(&earlier).unwrap(), b"from an earlier run");
    assert_eq!(
        std::fs::read(&outcome.materialized[0].resolved_path).unwrap(),
        b"new"
    );
}

#[tokio::test]
async fn test_identical_names_in_one_batch_get_distinct_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let batch = (0..4)
        .map(|i| candidate(format!("{}/f{i}.pdf", server.uri()), "Same", 1, "doc.pdf"))
        .collect();
    let outcome = engine(4, fast_policy(1), &dir)
        .download_batch(batch)
        .await
        .unwrap();

    assert_eq!(outcome.materialized.len(), 4);
    let mut paths: Vec<_> = outcome
        .materialized
        .iter()
        .map(|m| m.resolved_path.clone())
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 4);
}

// ==================== Retry Behavior ====================

#[tokio::test]
async fn test_not_found_is_permanent_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let outcome = engine(1, fast_policy(5), &dir)
        .download_batch(vec![candidate(
            format!("{}/gone.pdf", server.uri()),
            "Gone",
            1,
            "gone",
        )])
        .await
        .unwrap();

    assert!(outcome.materialized.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.attempts_made, 1);
    assert_eq!(
        failure.kind,
        FailureKind::Network(NetworkFailure::Permanent)
    );
    assert!(failure.message.contains("404"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let server = MockServer::start().await;
    let requests = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky.zip"))
        .respond_with(FlakyResponder {
            request_count: Arc::clone(&requests),
            failures: 2,
            body: b"archive".to_vec(),
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let outcome = engine(1, fast_policy(3), &dir)
        .download_batch(vec![candidate(
            format!("{}/flaky.zip", server.uri()),
            "Flaky",
            1,
            "bundle",
        )])
        .await
        .unwrap();

    assert!(outcome.failures.is_empty());
    let file = &outcome.materialized[0];
    assert_eq!(file.attempts_made, 3);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&file.resolved_path).unwrap(), b"archive");
    assert_eq!(outcome.stats.retried(), 2);
}

#[tokio::test]
async fn test_retries_exhausted_reports_attempt_count() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let outcome = engine(1, fast_policy(2), &dir)
        .download_batch(vec![candidate(
            format!("{}/broken.doc", server.uri()),
            "Broken",
            1,
            "broken",
        )])
        .await
        .unwrap();

    let failure = &outcome.failures[0];
    assert_eq!(failure.attempts_made, 2);
    assert_eq!(
        failure.kind,
        FailureKind::Network(NetworkFailure::RetryExhausted)
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_body_cut_short_is_discarded_before_retry() {
    let (base, requests) = truncating_server(1, 256 * 1024, 64 * 1024, b"short");

    let dir = TempDir::new().unwrap();
    let outcome = engine(1, fast_policy(3), &dir)
        .download_batch(vec![candidate(
            format!("{base}/report.pdf"),
            "Cut",
            1,
            "report",
        )])
        .await
        .unwrap();

    assert!(outcome.failures.is_empty());
    let file = &outcome.materialized[0];
    assert_eq!(file.attempts_made, 2);
    assert_eq!(file.bytes_written, 5);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(&file.resolved_path).unwrap(), b"short");
}

#[tokio::test]
async fn test_reserved_file_removed_after_partial_bodies_exhaust_retries() {
    let (base, requests) = truncating_server(usize::MAX, 256 * 1024, 64 * 1024, b"unused");

    let dir = TempDir::new().unwrap();
    let outcome = engine(1, fast_policy(2), &dir)
        .download_batch(vec![candidate(
            format!("{base}/report.pdf"),
            "Cut",
            1,
            "report",
        )])
        .await
        .unwrap();

    assert!(outcome.materialized.is_empty());
    let failure = &outcome.failures[0];
    assert_eq!(failure.attempts_made, 2);
    assert_eq!(
        failure.kind,
        FailureKind::Network(NetworkFailure::RetryExhausted)
    );
    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert!(!dir.path().join("Cut_1_report.pdf").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_fetch_to_file_replaces_earlier_contents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/small.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"small"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("small.txt");
    std::fs::write(&target, vec![b'x'; 32 * 1024]).unwrap();

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&target)
        .await
        .unwrap();
    let written = client()
        .fetch_to_file(&format!("{}/small.txt", server.uri()), &mut file, &target)
        .await
        .unwrap();
    drop(file);

    assert_eq!(written, 5);
    assert_eq!(std::fs::read(&target).unwrap(), b"small");
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let outcome = engine(2, fast_policy(2), &dir)
        .download_batch(vec![
            candidate(format!("{}/ok.pdf", server.uri()), "Page", 1, "ok"),
            candidate(format!("{}/missing.pdf", server.uri()), "Page", 2, "missing"),
        ])
        .await
        .unwrap();

    assert_eq!(outcome.materialized.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.materialized[0].candidate.ordinal, 1);
    assert_eq!(outcome.failures[0].candidate.ordinal, 2);
    assert_eq!(outcome.stats.total(), 2);
}

// ==================== Concurrency ====================

#[tokio::test]
async fn test_semaphore_limits_concurrent_downloads() {
    let server = MockServer::start().await;
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(ConcurrencyTrackingResponder {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
            delay_ms: 100,
        })
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let batch = (0..10)
        .map(|i| candidate(format!("{}/file{i}.txt", server.uri()), "Load", i + 1, "f"))
        .collect();
    let outcome = engine(3, fast_policy(1), &dir)
        .download_batch(batch)
        .await
        .unwrap();

    assert_eq!(outcome.materialized.len(), 10);
    let observed = peak.load(Ordering::SeqCst);
    assert!(observed <= 3, "peak concurrency {observed} exceeded limit of 3");
}

#[tokio::test]
async fn test_single_permit_serializes_transfers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let batch = (0..3)
        .map(|i| candidate(format!("{}/s{i}.pdf", server.uri()), "Slow", i + 1, "s"))
        .collect();

    let started = Instant::now();
    let outcome = engine(1, fast_policy(1), &dir)
        .download_batch(batch)
        .await
        .unwrap();

    assert_eq!(outcome.materialized.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(450));
}

// ==================== Deadline ====================

#[tokio::test]
async fn test_expired_deadline_aborts_pending_candidates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let batch = (0..3)
        .map(|i| candidate(format!("{}/d{i}.pdf", server.uri()), "Late", i + 1, "d"))
        .collect();
    let outcome = engine(1, fast_policy(1), &dir)
        .with_deadline(Some(Duration::from_millis(100)))
        .download_batch(batch)
        .await
        .unwrap();

    // The first transfer was admitted before the deadline and finishes.
    assert_eq!(outcome.materialized.len(), 1);
    assert_eq!(outcome.failures.len(), 2);
    assert!(
        outcome
            .failures
            .iter()
            .all(|f| f.kind == FailureKind::Aborted && f.attempts_made == 0)
    );
    assert_eq!(outcome.stats.aborted(), 2);
}
