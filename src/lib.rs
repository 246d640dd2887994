//! Harvester Core Library
//!
//! This library provides the core functionality for the harvester tool,
//! which walks a list of web pages, finds the downloadable attachments each
//! page links to, and saves them under deterministic, collision-free names.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run configuration (TOML) and validation
//! - [`source`] - Tabular input of pages to harvest
//! - [`http`] - Shared HTTP client with rotating User-Agent
//! - [`classify`] - Attachment link classification and ordinal assignment
//! - [`download`] - Concurrent download engine, retry policy, file naming
//! - [`render`] - Optional page document rendering
//! - [`aggregate`] - Pure fold of outcomes into per-page results
//! - [`orchestrator`] - Phase-by-phase run driver
//! - [`report`] - Status rows, JSON report, packaging hand-off

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod download;
pub mod http;
pub mod layout;
pub mod model;
pub mod orchestrator;
pub mod render;
pub mod report;
pub mod source;
pub mod user_agent;

// Re-export commonly used types
pub use classify::{AttachmentClassifier, ClassifyError, OrdinalLedger, PageLinks};
pub use config::{ConfigError, HarvestConfig};
pub use download::{
    BatchOutcome, DownloadEngine, DownloadStats, EngineError, FailureType, RetryDecision,
    RetryPolicy, classify_error,
};
pub use http::{FetchError, FetchedPage, HttpClient};
pub use layout::OutputLayout;
pub use model::{
    AttachmentCandidate, DownloadFailure, FailureKind, MaterializedFile, NetworkFailure,
    PageResult, SourceRecord,
};
pub use orchestrator::{HarvestError, HarvestOrchestrator, HarvestRun, RunPhase};
pub use render::{DocumentRenderer, HtmlSnapshotRenderer, RenderError};
pub use report::{
    JsonReportWriter, NoPackaging, Packager, ReportError, ResultWriter, TsvStatusWriter,
    ZipPackager, deliver,
};
pub use source::{DelimitedTextSource, PROCESSED_MARKER, SourceError, TabularSource};
