//! Core records passed between the harvest phases.
//!
//! The flow is `SourceRecord` → `AttachmentCandidate` → one of
//! `MaterializedFile` / `DownloadFailure` → `PageResult`.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;

/// One input unit read from the tabular source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    /// 1-based position in the input.
    pub index: usize,
    /// Absolute http(s) URL of the page to harvest.
    pub url: String,
    /// Page title; never blank (see [`SourceRecord::new`]).
    pub title: String,
}

impl SourceRecord {
    /// Creates a record, substituting `page_{index}` for a blank title.
    #[must_use]
    pub fn new(index: usize, url: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        let title = title.trim();
        let title = if title.is_empty() {
            placeholder_title(index)
        } else {
            title.to_string()
        };
        Self {
            index,
            url: url.into().trim().to_string(),
            title,
        }
    }
}

/// Placeholder title used when the source row has none.
#[must_use]
pub fn placeholder_title(index: usize) -> String {
    format!("page_{index}")
}

/// A link classified as a downloadable attachment.
///
/// The ordinal is fixed when the candidate is created and never changes,
/// so download workers share no naming counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentCandidate {
    /// Absolute URL of the attachment.
    pub url: String,
    /// Visible link text or a name derived from the URL.
    pub filename_hint: String,
    /// Title of the page the link was found on.
    pub source_title: String,
    /// URL of the page the link was found on.
    pub source_url: String,
    /// Index of the originating [`SourceRecord`].
    pub source_index: usize,
    /// Position of this candidate within its title group (1-based).
    pub ordinal: u32,
}

/// A candidate whose bytes were written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializedFile {
    pub candidate: AttachmentCandidate,
    pub resolved_path: PathBuf,
    pub bytes_written: u64,
    pub attempts_made: u32,
}

/// Network failure sub-kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFailure {
    /// The server refused the resource for good (400, 401, 403, 404, 410, 451).
    Permanent,
    /// Every allowed attempt failed with a retryable error.
    RetryExhausted,
    /// The host could not be reached or did not answer in time.
    ConnectionError,
}

/// Closed set of failure tags attached to candidates and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureKind {
    Network(NetworkFailure),
    /// The page could not be fetched or read during classification.
    Parse,
    /// A local filesystem operation failed.
    File,
    /// The transfer never finished: its worker panicked or the batch
    /// deadline elapsed before it was submitted.
    Aborted,
}

impl FailureKind {
    /// Short stable label for logs and status rows.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Network(NetworkFailure::Permanent) => "permanent",
            Self::Network(NetworkFailure::RetryExhausted) => "retry_exhausted",
            Self::Network(NetworkFailure::ConnectionError) => "connection_error",
            Self::Parse => "parse",
            Self::File => "file",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A candidate whose transfer could not complete.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadFailure {
    pub candidate: AttachmentCandidate,
    pub kind: FailureKind,
    pub message: String,
    pub attempts_made: u32,
}

/// Exactly one per [`SourceRecord`], whatever happened to it.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub source: SourceRecord,
    /// Whether the page was fetched and classified.
    pub success: bool,
    /// Links classified as attachments on this page.
    pub candidate_count: usize,
    /// Materialized files attributed to this record's title.
    pub attachment_count: usize,
    /// Download failures attributed to this record.
    pub failed_attachments: usize,
    /// Whether a rendered document was produced.
    pub rendered: bool,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub render_error: Option<String>,
    pub completed_at: DateTime<Local>,
}
