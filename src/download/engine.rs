//! Download engine for concurrent attachment transfers with retry support.
//!
//! The engine takes a batch of ordinal-stamped [`AttachmentCandidate`]s,
//! runs one Tokio task per candidate under a semaphore, and returns every
//! outcome. Each candidate ends up in exactly one of
//! [`BatchOutcome::materialized`] or [`BatchOutcome::failures`].
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::config::HarvestConfig;
//! use harvester_core::download::{DownloadEngine, RetryPolicy};
//! use harvester_core::http::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::from_config(&HarvestConfig::default())?;
//! let engine = DownloadEngine::new(5, RetryPolicy::default(), client, "./attachments".into())?;
//! let outcome = engine.download_batch(Vec::new()).await?;
//! println!("Completed: {}, Failed: {}", outcome.stats.completed(), outcome.stats.failed());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::filename::{compose_file_name, reserve_unique_path};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use crate::config::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::http::{FetchError, HttpClient};
use crate::model::{
    AttachmentCandidate, DownloadFailure, FailureKind, MaterializedFile, NetworkFailure,
};

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Statistics from a download batch run.
///
/// Atomic counters so concurrent tasks can update them without locking.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    aborted: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of materialized candidates.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed candidates, aborted ones included.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of candidates accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    /// Returns the number of retry attempts made.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Returns the number of candidates that never ran to completion.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        self.increment_failed();
    }

    fn snapshot(&self) -> Self {
        Self {
            completed: AtomicUsize::new(self.completed()),
            failed: AtomicUsize::new(self.failed()),
            retried: AtomicUsize::new(self.retried()),
            aborted: AtomicUsize::new(self.aborted()),
        }
    }
}

/// Every outcome of one [`DownloadEngine::download_batch`] call.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Candidates written to disk, in completion order.
    pub materialized: Vec<MaterializedFile>,
    /// Candidates that could not be written, in completion order.
    pub failures: Vec<DownloadFailure>,
    /// Counters for the batch.
    pub stats: DownloadStats,
}

/// Concurrent attachment downloader.
///
/// # Concurrency Model
///
/// - Each candidate runs in its own Tokio task
/// - A semaphore permit is acquired before the task is spawned
/// - Permits are released when the task finishes (RAII)
/// - Tasks share only the client, the directory, and atomic counters
///
/// # Retry Behavior
///
/// - Transient errors (timeouts, connection errors, 5xx, 429) retry with
///   linear backoff until the attempt budget is spent
/// - Permanent errors (400, 401, 403, 404, 410, 451) fail after one attempt
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    client: HttpClient,
    attachments_dir: PathBuf,
    deadline: Option<Duration>,
}

impl DownloadEngine {
    /// Creates a new engine writing into `attachments_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is
    /// outside 1-100.
    #[instrument(level = "debug", skip(retry_policy, client), fields(dir = %attachments_dir.display()))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        client: HttpClient,
        attachments_dir: PathBuf,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            base_delay_ms = retry_policy.base_delay().as_millis(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            client,
            attachments_dir,
            deadline: None,
        })
    }

    /// Stops submitting new candidates once `deadline` has elapsed since the
    /// batch started. In-flight transfers still run to completion.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the directory attachments are written to.
    #[must_use]
    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Downloads every candidate and collects their outcomes.
    ///
    /// Individual transfer failures never fail the batch; they are returned
    /// in [`BatchOutcome::failures`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len(), dir = %self.attachments_dir.display()))]
    pub async fn download_batch(
        &self,
        candidates: Vec<AttachmentCandidate>,
    ) -> Result<BatchOutcome, EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let mut outcome = BatchOutcome::default();
        let mut handles = Vec::with_capacity(candidates.len());
        let deadline = self.deadline.map(|d| Instant::now() + d);

        info!("starting download batch");

        let mut pending = candidates.into_iter();
        while let Some(candidate) = pending.next() {
            let acquired = match deadline {
                Some(at) if Instant::now() >= at => None,
                Some(at) => {
                    tokio::time::timeout_at(at, self.semaphore.clone().acquire_owned())
                        .await
                        .ok()
                }
                None => Some(self.semaphore.clone().acquire_owned().await),
            };

            let Some(permit) = acquired else {
                let remaining: Vec<_> = std::iter::once(candidate).chain(pending.by_ref()).collect();
                warn!(
                    unsubmitted = remaining.len(),
                    "batch deadline elapsed, abandoning unsubmitted candidates"
                );
                for candidate in remaining {
                    stats.increment_aborted();
                    outcome.failures.push(aborted(
                        candidate,
                        "batch deadline elapsed before transfer started",
                    ));
                }
                break;
            };
            let permit = permit.map_err(|_| EngineError::SemaphoreClosed)?;

            debug!(url = %candidate.url, ordinal = candidate.ordinal, "submitting candidate");

            let client = self.client.clone();
            let policy = self.retry_policy.clone();
            let dir = self.attachments_dir.clone();
            let task_stats = Arc::clone(&stats);
            let task_candidate = candidate.clone();

            handles.push((
                candidate,
                tokio::spawn(async move {
                    let _permit = permit;
                    materialize(&client, task_candidate, &dir, &policy, &task_stats).await
                }),
            ));
        }

        debug!(
            task_count = handles.len(),
            "waiting for downloads to complete"
        );

        for (candidate, handle) in handles {
            match handle.await {
                Ok(Ok(file)) => {
                    stats.increment_completed();
                    outcome.materialized.push(file);
                }
                Ok(Err(failure)) => {
                    stats.increment_failed();
                    outcome.failures.push(failure);
                }
                Err(e) => {
                    warn!(url = %candidate.url, error = %e, "download task panicked");
                    stats.increment_aborted();
                    outcome
                        .failures
                        .push(aborted(candidate, &format!("download task failed: {e}")));
                }
            }
        }

        outcome.stats = stats.snapshot();
        info!(
            completed = outcome.stats.completed(),
            failed = outcome.stats.failed(),
            retried = outcome.stats.retried(),
            aborted = outcome.stats.aborted(),
            "download batch complete"
        );

        Ok(outcome)
    }
}

fn aborted(candidate: AttachmentCandidate, message: &str) -> DownloadFailure {
    DownloadFailure {
        candidate,
        kind: FailureKind::Aborted,
        message: message.to_string(),
        attempts_made: 0,
    }
}

/// Names, reserves, and downloads one candidate.
///
/// On failure the reserved file is removed, so a candidate is either fully
/// on disk or absent.
#[instrument(skip_all, fields(url = %candidate.url, title = %candidate.source_title, ordinal = candidate.ordinal))]
async fn materialize(
    client: &HttpClient,
    candidate: AttachmentCandidate,
    dir: &Path,
    policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<MaterializedFile, DownloadFailure> {
    let name = compose_file_name(
        &candidate.source_title,
        candidate.ordinal,
        &candidate.filename_hint,
        &candidate.url,
    );

    let path = match reserve_unique_path(dir, &name).await {
        Ok(path) => path,
        Err(e) => {
            warn!(name = %name, error = %e, "could not reserve attachment path");
            return Err(DownloadFailure {
                candidate,
                kind: FailureKind::File,
                message: format!("cannot create file for '{name}': {e}"),
                attempts_made: 0,
            });
        }
    };

    match download_with_retry(client, &candidate.url, &path, policy, stats).await {
        Ok((bytes_written, attempts_made)) => {
            info!(path = %path.display(), bytes = bytes_written, attempts = attempts_made, "attachment saved");
            Ok(MaterializedFile {
                candidate,
                resolved_path: path,
                bytes_written,
                attempts_made,
            })
        }
        Err((error, failure_type, attempts_made)) => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove reserved file");
            }
            let kind = failure_kind(&error, failure_type);
            warn!(kind = %kind, attempts = attempts_made, error = %error, "attachment failed");
            Err(DownloadFailure {
                candidate,
                kind,
                message: error.to_string(),
                attempts_made,
            })
        }
    }
}

/// Maps the last error of a candidate to its reported failure kind.
fn failure_kind(error: &FetchError, failure_type: FailureType) -> FailureKind {
    match (failure_type, error) {
        (FailureType::Permanent, _) => FailureKind::Network(NetworkFailure::Permanent),
        (FailureType::Transient, FetchError::Io { .. }) => FailureKind::File,
        (FailureType::Transient, _) => FailureKind::Network(NetworkFailure::RetryExhausted),
    }
}

/// Downloads into `path` with retry logic for transient errors.
///
/// The destination is reopened (and truncated) for every attempt.
///
/// # Returns
///
/// - `Ok((bytes, attempts))` on success
/// - `Err((error, failure_type, attempts))` with the last error otherwise
async fn download_with_retry(
    client: &HttpClient,
    url: &str,
    path: &Path,
    policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<(u64, u32), (FetchError, FailureType, u32)> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, "attempting download");

        let result = match OpenOptions::new().write(true).open(path).await {
            Ok(mut file) => client.fetch_to_file(url, &mut file, path).await,
            Err(e) => Err(FetchError::io(path, e)),
        };

        match result {
            Ok(bytes) => return Ok((bytes, attempt)),
            Err(e) => {
                let failure_type = classify_error(&e);
                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry {
                        delay,
                        attempt: next_attempt,
                    } => {
                        info!(
                            url = %url,
                            attempt = next_attempt,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "retrying download"
                        );
                        stats.increment_retried();
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(url = %url, %reason, "not retrying download");
                        return Err((e, failure_type, attempt));
                    }
                }
            }
        }
    }
}
