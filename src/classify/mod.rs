//! Attachment classification for fetched pages.
//!
//! Every hyperlink on a page is resolved to an absolute URL and tested, in
//! order, against:
//!
//! 1. the configured extension set (path suffix, case-insensitive),
//! 2. the configured keyword set (substring of the visible link text),
//! 3. an explicit `download` attribute on the anchor.
//!
//! The first match wins. Links matching none are dropped; only their count
//! is kept for diagnostics.

mod links;
mod ordinal;

pub use links::{RawAnchor, extract_anchors, file_name_from_url, resolve_href, visible_text};
pub use ordinal::OrdinalLedger;

use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::config::HarvestConfig;
use crate::http::{FetchError, FetchedPage, HttpClient};
use crate::model::{FailureKind, NetworkFailure, SourceRecord};

/// Hint used when neither link text nor URL yields a name.
pub const FALLBACK_HINT: &str = "unnamed_attachment";

/// Which rule classified a link as an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Extension,
    Keyword,
    DownloadAttribute,
}

/// A link accepted as an attachment, before ordinal assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedLink {
    pub url: String,
    pub filename_hint: String,
    pub reason: MatchReason,
}

/// Classification output for one page.
#[derive(Debug, Clone, Default)]
pub struct PageLinks {
    /// Accepted links in document order.
    pub links: Vec<ClassifiedLink>,
    /// Links that resolved but matched no rule.
    pub discarded: usize,
}

/// Errors scoped to classifying a single source record.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The page could not be fetched.
    #[error("failed to fetch page: {0}")]
    Fetch(#[from] FetchError),

    /// The page URL cannot serve as a base for relative links.
    #[error("page URL cannot be used as a link base: {url}")]
    InvalidBase { url: String },
}

impl ClassifyError {
    /// Failure tag recorded on the page result.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(e) if e.is_connection_failure() => {
                FailureKind::Network(NetworkFailure::ConnectionError)
            }
            Self::Fetch(_) | Self::InvalidBase { .. } => FailureKind::Parse,
        }
    }
}

/// Decides which links on a page are attachments.
#[derive(Debug, Clone)]
pub struct AttachmentClassifier {
    extensions: Vec<String>,
    keywords: Vec<String>,
}

impl AttachmentClassifier {
    /// Creates a classifier; rules are matched lower-cased.
    #[must_use]
    pub fn new(extensions: Vec<String>, keywords: Vec<String>) -> Self {
        Self {
            extensions: extensions.into_iter().map(|e| e.to_lowercase()).collect(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Creates a classifier from the configured extension and keyword sets.
    #[must_use]
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(config.normalized_extensions(), config.normalized_keywords())
    }

    /// Fetches a record's page and classifies its links.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] when the page cannot be fetched or its URL
    /// cannot anchor relative links.
    #[instrument(skip(self, client, record), fields(index = record.index, url = %record.url))]
    pub async fn classify_source(
        &self,
        client: &HttpClient,
        record: &SourceRecord,
    ) -> Result<PageLinks, ClassifyError> {
        let page = client.fetch_page(&record.url).await?;
        self.classify(&page)
    }

    /// Classifies the links of an already fetched page.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::InvalidBase`] if the page URL does not parse.
    pub fn classify(&self, page: &FetchedPage) -> Result<PageLinks, ClassifyError> {
        let base = Url::parse(&page.final_url).map_err(|_| ClassifyError::InvalidBase {
            url: page.final_url.clone(),
        })?;
        Ok(self.classify_markup(&page.body, &base))
    }

    /// Classifies the anchors in `markup`, resolving hrefs against `base`.
    #[must_use]
    pub fn classify_markup(&self, markup: &str, base: &Url) -> PageLinks {
        let mut result = PageLinks::default();

        for anchor in extract_anchors(markup) {
            let Some(url) = resolve_href(&anchor.href, base) else {
                continue;
            };
            match self.match_reason(&url, &anchor) {
                Some(reason) => {
                    let filename_hint = filename_hint(&anchor, &url);
                    result.links.push(ClassifiedLink {
                        url: url.to_string(),
                        filename_hint,
                        reason,
                    });
                }
                None => result.discarded += 1,
            }
        }

        debug!(
            base = %base,
            accepted = result.links.len(),
            discarded = result.discarded,
            "classified page links"
        );
        result
    }

    fn match_reason(&self, url: &Url, anchor: &RawAnchor) -> Option<MatchReason> {
        let path = url.path().to_lowercase();
        if self.extensions.iter().any(|ext| path.ends_with(ext.as_str())) {
            return Some(MatchReason::Extension);
        }

        let text = anchor.text.to_lowercase();
        if self.keywords.iter().any(|kw| text.contains(kw.as_str())) {
            return Some(MatchReason::Keyword);
        }

        anchor.download.then_some(MatchReason::DownloadAttribute)
    }
}

fn filename_hint(anchor: &RawAnchor, url: &Url) -> String {
    if !anchor.text.is_empty() {
        return anchor.text.clone();
    }
    file_name_from_url(url).unwrap_or_else(|| FALLBACK_HINT.to_string())
}
