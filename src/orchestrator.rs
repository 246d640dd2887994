//! Run driver: classify every page, download every attachment, optionally
//! render, then fold everything into one result per record.
//!
//! # Phases
//!
//! ```text
//! Initialized → Classifying → Downloading → Rendering? → Aggregated → Terminal
//! ```
//!
//! Classification is sequential so per-title ordinals are assigned in input
//! order with no shared state. Downloading is the only concurrent phase.
//! Errors scoped to one record or one candidate end up on that record's
//! [`PageResult`]; only batch-level problems surface as [`HarvestError`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::aggregate::{Classification, RenderOutcome, fold_run};
use crate::classify::{AttachmentClassifier, OrdinalLedger};
use crate::config::{ConfigError, HarvestConfig};
use crate::download::{DownloadEngine, EngineError};
use crate::http::{FetchError, HttpClient};
use crate::layout::OutputLayout;
use crate::model::{
    AttachmentCandidate, DownloadFailure, MaterializedFile, PageResult, SourceRecord,
};
use crate::render::DocumentRenderer;
use crate::source::{SourceError, TabularSource};

/// Batch-level failures that abort a run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The batch held no records.
    #[error("input batch contains no records")]
    EmptyBatch,

    /// The configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The input could not be read.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The output directories could not be created.
    #[error("failed to prepare output directory {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The download engine rejected its settings or broke down.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] FetchError),
}

/// Run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initialized,
    Classifying,
    Downloading,
    Rendering,
    Aggregated,
    Terminal,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Classifying => "classifying",
            Self::Downloading => "downloading",
            Self::Rendering => "rendering",
            Self::Aggregated => "aggregated",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Everything a finished run hands off.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestRun {
    /// One result per input record, in input order.
    pub results: Vec<PageResult>,
    pub materialized: Vec<MaterializedFile>,
    pub failures: Vec<DownloadFailure>,
    /// Links seen on classified pages that matched no attachment rule.
    pub discarded_links: usize,
    /// Shared completion timestamp stamped on every result.
    pub completed_at: DateTime<Local>,
}

impl HarvestRun {
    /// Records whose page was classified.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    /// Records with a rendered document.
    #[must_use]
    pub fn rendered(&self) -> usize {
        self.results.iter().filter(|r| r.rendered).count()
    }
}

/// Drives one harvest run through its phases.
pub struct HarvestOrchestrator {
    config: HarvestConfig,
    layout: OutputLayout,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    phase: RunPhase,
}

impl fmt::Debug for HarvestOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestOrchestrator")
            .field("layout", &self.layout)
            .field("renderer", &self.renderer.as_ref().map(|r| r.name()))
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl HarvestOrchestrator {
    /// Creates an orchestrator writing under `config.output_dir`.
    ///
    /// Rendering runs only when a renderer is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] if the configuration is invalid.
    pub fn new(
        config: HarvestConfig,
        renderer: Option<Arc<dyn DocumentRenderer>>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        let layout = OutputLayout::new(&config.output_dir);
        Ok(Self {
            config,
            layout,
            renderer,
            phase: RunPhase::Initialized,
        })
    }

    /// Overrides the output layout.
    #[must_use]
    pub fn with_layout(mut self, layout: OutputLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Reads the batch from `source` and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Source`] if the source cannot be read, plus
    /// everything [`HarvestOrchestrator::run`] returns.
    pub async fn run_from_source(
        self,
        source: &dyn TabularSource,
    ) -> Result<HarvestRun, HarvestError> {
        let records = source.read_records().await?;
        self.run(records).await
    }

    /// Runs a batch of records to completion.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError`] only for batch-level failures: an empty
    /// batch, an unusable output directory, or an HTTP client or engine that
    /// cannot be built.
    #[instrument(skip(self, records), fields(records = records.len(), root = %self.layout.root().display()))]
    pub async fn run(mut self, records: Vec<SourceRecord>) -> Result<HarvestRun, HarvestError> {
        if records.is_empty() {
            return Err(HarvestError::EmptyBatch);
        }

        self.layout
            .prepare()
            .await
            .map_err(|source| HarvestError::Layout {
                path: self.layout.root().to_path_buf(),
                source,
            })?;
        let client = HttpClient::from_config(&self.config)?;

        self.transition(RunPhase::Classifying);
        let (classifications, candidates, discarded_links) =
            self.classify_all(&client, &records).await;

        self.transition(RunPhase::Downloading);
        let engine = DownloadEngine::new(
            self.config.concurrency,
            self.config.retry_policy(),
            client.clone(),
            self.layout.attachments_dir(),
        )?
        .with_deadline(self.config.batch_deadline());
        let outcome = engine.download_batch(candidates).await?;

        let renderings = match self.renderer.clone() {
            Some(renderer) => {
                self.transition(RunPhase::Rendering);
                self.render_all(renderer.as_ref(), &client, &records).await
            }
            None => vec![None; records.len()],
        };

        self.transition(RunPhase::Aggregated);
        let completed_at = Local::now();
        let results = fold_run(
            &records,
            &classifications,
            &outcome.materialized,
            &outcome.failures,
            &renderings,
            completed_at,
        );

        self.transition(RunPhase::Terminal);
        let run = HarvestRun {
            results,
            materialized: outcome.materialized,
            failures: outcome.failures,
            discarded_links,
            completed_at,
        };
        info!(
            records = run.results.len(),
            succeeded = run.succeeded(),
            attachments = run.materialized.len(),
            failed_attachments = run.failures.len(),
            rendered = run.rendered(),
            "harvest run complete"
        );
        Ok(run)
    }

    fn transition(&mut self, next: RunPhase) {
        info!(from = %self.phase, to = %next, "run phase transition");
        self.phase = next;
    }

    /// Fetches and classifies each record in order, stamping ordinals.
    async fn classify_all(
        &self,
        client: &HttpClient,
        records: &[SourceRecord],
    ) -> (Vec<Classification>, Vec<AttachmentCandidate>, usize) {
        let classifier = AttachmentClassifier::from_config(&self.config);
        let mut ledger = OrdinalLedger::new();
        let mut classifications = Vec::with_capacity(records.len());
        let mut candidates = Vec::new();
        let mut discarded_links = 0;

        for record in records {
            match classifier.classify_source(client, record).await {
                Ok(page) => {
                    info!(
                        index = record.index,
                        title = %record.title,
                        attachments = page.links.len(),
                        "page classified"
                    );
                    discarded_links += page.discarded;
                    classifications.push(Classification::Classified {
                        candidates: page.links.len(),
                        discarded: page.discarded,
                    });
                    candidates.extend(ledger.stamp(record, page.links));
                }
                Err(e) => {
                    warn!(index = record.index, url = %record.url, error = %e, "page classification failed");
                    classifications.push(Classification::Failed {
                        message: e.to_string(),
                        kind: e.kind(),
                    });
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            discarded_links, "classification finished"
        );
        (classifications, candidates, discarded_links)
    }

    /// Re-fetches each record's page and renders it.
    async fn render_all(
        &self,
        renderer: &dyn DocumentRenderer,
        client: &HttpClient,
        records: &[SourceRecord],
    ) -> Vec<Option<RenderOutcome>> {
        let dir = self.layout.documents_dir();
        let mut renderings = Vec::with_capacity(records.len());

        for record in records {
            let outcome = match client.fetch_page(&record.url).await {
                Ok(page) => renderer
                    .render(record, &page, &dir)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match &outcome {
                Ok(path) => debug!(index = record.index, path = %path.display(), "page rendered"),
                Err(e) => warn!(
                    index = record.index,
                    renderer = renderer.name(),
                    error = %e,
                    "page rendering failed"
                ),
            }
            renderings.push(Some(outcome));
        }
        renderings
    }
}
