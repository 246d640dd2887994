//! Tabular input of pages to harvest.
//!
//! [`TabularSource`] is the seam the orchestrator reads through;
//! [`DelimitedTextSource`] is the tab-separated implementation the binary
//! uses.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::SourceRecord;

/// Header names recognised for the URL column (compared lower-cased).
const URL_HEADERS: &[&str] = &["url", "link", "href", "address", "链接", "网址", "标题链接"];

/// Header names recognised for the title column (compared lower-cased).
const TITLE_HEADERS: &[&str] = &["title", "name", "subject", "标题", "名称", "题目"];

/// Cell values treated as empty.
const NULL_VALUES: &[&str] = &["nan", "none", "null"];

/// File-name prefix given to an input once a run over it has finished.
pub const PROCESSED_MARKER: &str = "【已执行】";

/// Errors reading a tabular source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source file could not be read.
    #[error("failed to read source {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A finished input could not be renamed with the processed marker.
    #[error("failed to mark {path} as processed: {source}")]
    Mark {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Yields the ordered records of one harvest batch.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Reads every usable record, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the source as a whole cannot be read.
    /// Individual unusable rows are skipped, not errors.
    async fn read_records(&self) -> Result<Vec<SourceRecord>, SourceError>;
}

/// Tab-separated text file with an optional header row.
#[derive(Debug, Clone)]
pub struct DelimitedTextSource {
    path: PathBuf,
}

impl DelimitedTextSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file name carries [`PROCESSED_MARKER`].
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().contains(PROCESSED_MARKER))
    }

    /// Renames the file to `{PROCESSED_MARKER}{name}` in the same directory
    /// and returns the new path. An existing file at the target is never
    /// replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Mark`] if the target exists or the rename fails.
    pub async fn mark_processed(&self) -> Result<PathBuf, SourceError> {
        let mark_err = |source| SourceError::Mark {
            path: self.path.clone(),
            source,
        };
        if self.is_processed() {
            return Ok(self.path.clone());
        }
        let Some(name) = self.path.file_name() else {
            return Err(mark_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "input path has no file name",
            )));
        };
        let target = self
            .path
            .with_file_name(format!("{PROCESSED_MARKER}{}", name.to_string_lossy()));

        if tokio::fs::try_exists(&target).await.map_err(mark_err)? {
            return Err(mark_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            )));
        }
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(mark_err)?;
        debug!(from = %self.path.display(), to = %target.display(), "input marked processed");
        Ok(target)
    }
}

#[async_trait]
impl TabularSource for DelimitedTextSource {
    async fn read_records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        let records = parse_records(&content);
        debug!(path = %self.path.display(), records = records.len(), "read source records");
        Ok(records)
    }
}

/// Column positions for url and title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    url: usize,
    title: Option<usize>,
}

/// Parses tab-separated text into records.
///
/// Blank lines and lines starting with `#` are skipped. If the first
/// remaining line names a URL column it is treated as a header. Otherwise
/// the URL column is the first cell of the first row that looks like a URL,
/// and the title is the first other column. Record indices count data rows
/// from 1, including rows later skipped for an unusable URL.
#[must_use]
pub fn parse_records(content: &str) -> Vec<SourceRecord> {
    let mut lines = content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .peekable();

    let Some(first) = lines.peek() else {
        return Vec::new();
    };
    let first_cells: Vec<&str> = first.split('\t').collect();

    let columns = match header_columns(&first_cells) {
        Some(columns) => {
            lines.next();
            columns
        }
        None => guess_columns(&first_cells),
    };

    let mut records = Vec::new();
    for (row, line) in lines.enumerate() {
        let index = row + 1;
        let cells: Vec<&str> = line.split('\t').collect();
        let raw_url = cells.get(columns.url).copied().map_or("", str::trim);

        let Some(url) = repair_url(raw_url) else {
            warn!(index, value = %raw_url, "skipping row without a usable URL");
            continue;
        };

        let title = columns
            .title
            .and_then(|i| cells.get(i))
            .map(|cell| cell.trim())
            .filter(|cell| !is_null(cell))
            .unwrap_or("");

        records.push(SourceRecord::new(index, url, title));
    }
    records
}

fn header_columns(cells: &[&str]) -> Option<Columns> {
    let position = |names: &[&str]| {
        cells
            .iter()
            .position(|cell| names.contains(&cell.trim().to_lowercase().as_str()))
    };
    let url = position(URL_HEADERS)?;
    Some(Columns {
        url,
        title: position(TITLE_HEADERS),
    })
}

fn guess_columns(cells: &[&str]) -> Columns {
    let url = cells
        .iter()
        .position(|cell| looks_like_url(cell))
        .unwrap_or(0);
    let title = (0..cells.len()).find(|&i| i != url);
    Columns { url, title }
}

fn looks_like_url(cell: &str) -> bool {
    let lowered = cell.trim().to_lowercase();
    lowered.starts_with("http") || lowered.starts_with("www.")
}

fn is_null(value: &str) -> bool {
    value.is_empty() || NULL_VALUES.contains(&value.to_lowercase().as_str())
}

/// Repairs common URL mistakes in spreadsheet exports.
///
/// - `https:/host` and `http:/host` get their missing slash back
/// - `www.host` and bare dotted hosts get an `https://` prefix
///
/// Returns `None` for empty, null-like, or unrepairable values.
#[must_use]
pub fn repair_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if is_null(raw) {
        return None;
    }
    let lowered = raw.to_lowercase();

    if lowered.starts_with("https://") || lowered.starts_with("http://") {
        return Some(raw.to_string());
    }
    if lowered.starts_with("https:/") {
        return Some(format!("https://{}", &raw["https:/".len()..]));
    }
    if lowered.starts_with("http:/") {
        return Some(format!("http://{}", &raw["http:/".len()..]));
    }
    if raw.contains("://") || raw.contains(char::is_whitespace) {
        return None;
    }
    if lowered.starts_with("www.") || raw.contains('.') {
        return Some(format!("https://{raw}"));
    }
    None
}
