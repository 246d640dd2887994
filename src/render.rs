//! Page document rendering.
//!
//! Rendering is an optional phase: the orchestrator re-fetches each page and
//! hands it to a [`DocumentRenderer`]. Failures are recorded on the page's
//! result and never touch attachment outcomes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::download::{reserve_unique_path, sanitize_component, truncate_bytes};
use crate::http::FetchedPage;
use crate::model::{SourceRecord, placeholder_title};

/// Longest sanitized title used as a document name, in bytes.
const MAX_DOCUMENT_TITLE_BYTES: usize = 150;

/// Errors producing a rendered document.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The fetched page had no content to render.
    #[error("page body is empty: {url}")]
    EmptyBody { url: String },

    /// The document could not be written.
    #[error("failed to write document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Turns a fetched page into a document on disk.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Short renderer name for logs.
    fn name(&self) -> &'static str;

    /// Renders `page` into `dir`, returning the written path.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if nothing could be written.
    async fn render(
        &self,
        record: &SourceRecord,
        page: &FetchedPage,
        dir: &Path,
    ) -> Result<PathBuf, RenderError>;
}

/// Saves the page markup as `{title}.html`, suffixing on collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSnapshotRenderer;

#[async_trait]
impl DocumentRenderer for HtmlSnapshotRenderer {
    fn name(&self) -> &'static str {
        "html-snapshot"
    }

    #[instrument(level = "debug", skip_all, fields(index = record.index, title = %record.title))]
    async fn render(
        &self,
        record: &SourceRecord,
        page: &FetchedPage,
        dir: &Path,
    ) -> Result<PathBuf, RenderError> {
        if page.body.trim().is_empty() {
            return Err(RenderError::EmptyBody {
                url: page.final_url.clone(),
            });
        }

        let title = sanitize_component(&record.title);
        let title = if title.is_empty() {
            placeholder_title(record.index)
        } else {
            truncate_bytes(&title, MAX_DOCUMENT_TITLE_BYTES).to_string()
        };
        let name = format!("{title}.html");

        let path = reserve_unique_path(dir, &name)
            .await
            .map_err(|source| RenderError::Io {
                path: dir.join(&name),
                source,
            })?;

        let preamble = format!("<!-- saved from {} -->\n", page.final_url);
        if let Err(source) = write_document(&path, &preamble, &page.body).await {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove partial document");
            }
            return Err(RenderError::Io { path, source });
        }

        debug!(path = %path.display(), bytes = page.body.len(), "document saved");
        Ok(path)
    }
}

async fn write_document(path: &Path, preamble: &str, body: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.write_all(preamble.as_bytes()).await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await
}
