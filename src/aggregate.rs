//! Folding of per-phase outcomes into one [`PageResult`] per record.
//!
//! Everything here is pure: no I/O, no clock reads, no panics. The run's
//! completion timestamp is passed in so every result carries the same one.

use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::model::{DownloadFailure, FailureKind, MaterializedFile, PageResult, SourceRecord};

/// What classification produced for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The page was fetched and its links classified.
    Classified {
        /// Links accepted as attachments.
        candidates: usize,
        /// Links that matched no rule.
        discarded: usize,
    },
    /// The page could not be classified.
    Failed { message: String, kind: FailureKind },
}

/// What rendering produced for one record, when it was attempted.
pub type RenderOutcome = Result<PathBuf, String>;

/// Folds one record's outcomes into its [`PageResult`].
///
/// `materialized` and `failures` may hold the whole run's outcomes; only
/// the ones belonging to `record` are counted. A materialized file belongs
/// to every classified record sharing its source title, a failure to the
/// record that produced its candidate. A record whose classification
/// failed never counts attachments.
#[must_use]
pub fn fold_record(
    record: &SourceRecord,
    classification: &Classification,
    materialized: &[MaterializedFile],
    failures: &[DownloadFailure],
    rendering: Option<&RenderOutcome>,
    completed_at: DateTime<Local>,
) -> PageResult {
    let failed_attachments = failures
        .iter()
        .filter(|failure| failure.candidate.source_index == record.index)
        .count();

    let (success, candidate_count, attachment_count, error, error_kind) = match classification {
        Classification::Classified { candidates, .. } => {
            let attachment_count = materialized
                .iter()
                .filter(|file| file.candidate.source_title == record.title)
                .count();
            (true, *candidates, attachment_count, None, None)
        }
        Classification::Failed { message, kind } => {
            (false, 0, 0, Some(message.clone()), Some(*kind))
        }
    };

    let (rendered, render_error) = match rendering {
        Some(Ok(_)) => (true, None),
        Some(Err(message)) => (false, Some(message.clone())),
        None => (false, None),
    };

    PageResult {
        source: record.clone(),
        success,
        candidate_count,
        attachment_count,
        failed_attachments,
        rendered,
        error,
        error_kind,
        render_error,
        completed_at,
    }
}

/// Folds a whole run, one result per record in input order.
///
/// `classifications` and `renderings` are indexed like `records`; a
/// missing entry is treated as a failed classification or an unattempted
/// render, so the output always has `records.len()` results.
#[must_use]
pub fn fold_run(
    records: &[SourceRecord],
    classifications: &[Classification],
    materialized: &[MaterializedFile],
    failures: &[DownloadFailure],
    renderings: &[Option<RenderOutcome>],
    completed_at: DateTime<Local>,
) -> Vec<PageResult> {
    let missing = Classification::Failed {
        message: "record was not classified".to_string(),
        kind: FailureKind::Aborted,
    };

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            fold_record(
                record,
                classifications.get(i).unwrap_or(&missing),
                materialized,
                failures,
                renderings.get(i).and_then(Option::as_ref),
                completed_at,
            )
        })
        .collect()
}
