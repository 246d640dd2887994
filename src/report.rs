//! Terminal hand-off: status rows, the JSON run report, and packaging.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::layout::{ATTACHMENTS_DIR, DOCUMENTS_DIR, OutputLayout};
use crate::model::{DownloadFailure, PageResult};
use crate::orchestrator::HarvestRun;

/// File name of the JSON run report inside the output root.
pub const REPORT_FILE_NAME: &str = "harvest_report.json";

/// Column order of the status file.
pub const STATUS_COLUMNS: &[&str] = &[
    "index",
    "url",
    "title",
    "success",
    "attachments",
    "rendered",
    "error",
    "render_error",
    "completed_at",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors writing run output.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ReportError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Writes one status row per source record back to the tabular store.
#[async_trait]
pub trait ResultWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ReportError`] if the rows cannot be written.
    async fn write_results(&self, results: &[PageResult]) -> Result<(), ReportError>;
}

/// Archives a run's output directories.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Packages `layout`, returning the archive path if one was produced.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] if packaging was attempted and failed.
    async fn package(&self, layout: &OutputLayout) -> Result<Option<PathBuf>, ReportError>;
}

/// Packager that leaves the output directories as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPackaging;

#[async_trait]
impl Packager for NoPackaging {
    async fn package(&self, layout: &OutputLayout) -> Result<Option<PathBuf>, ReportError> {
        debug!(root = %layout.root().display(), "packaging disabled");
        Ok(None)
    }
}

/// Zips `attachments/` and `documents/` into `{root}.zip` beside the
/// output root. Folders that were never created are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipPackager;

impl ZipPackager {
    /// Where the archive for `layout` is written.
    #[must_use]
    pub fn archive_path(layout: &OutputLayout) -> PathBuf {
        let root = layout.root();
        match (root.parent(), root.file_name()) {
            (Some(parent), Some(name)) => {
                parent.join(format!("{}.zip", name.to_string_lossy()))
            }
            _ => root.join("harvest.zip"),
        }
    }
}

#[async_trait]
impl Packager for ZipPackager {
    #[instrument(level = "debug", skip_all, fields(root = %layout.root().display()))]
    async fn package(&self, layout: &OutputLayout) -> Result<Option<PathBuf>, ReportError> {
        let archive = Self::archive_path(layout);
        let folders = vec![
            (ATTACHMENTS_DIR, layout.attachments_dir()),
            (DOCUMENTS_DIR, layout.documents_dir()),
        ];

        let target = archive.clone();
        let entries = tokio::task::spawn_blocking(move || write_archive(&target, &folders))
            .await
            .map_err(|e| ReportError::io(&archive, io::Error::other(e)))??;

        debug!(entries, "archive written");
        Ok(Some(archive))
    }
}

/// Writes every regular file of `folders` under its folder prefix.
fn write_archive(archive: &Path, folders: &[(&str, PathBuf)]) -> Result<usize, ReportError> {
    let zip_err = |source| ReportError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = std::fs::File::create(archive).map_err(|e| ReportError::io(archive, e))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    for (prefix, dir) in folders {
        if !dir.is_dir() {
            continue;
        }
        writer
            .add_directory(format!("{prefix}/"), options)
            .map_err(zip_err)?;

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| ReportError::io(dir, e))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in files {
            let Some(name) = path.file_name() else {
                continue;
            };
            writer
                .start_file(format!("{prefix}/{}", name.to_string_lossy()), options)
                .map_err(zip_err)?;
            let mut source = std::fs::File::open(&path).map_err(|e| ReportError::io(&path, e))?;
            io::copy(&mut source, &mut writer).map_err(|e| ReportError::io(&path, e))?;
            entries += 1;
        }
    }

    writer.finish().map_err(zip_err)?;
    Ok(entries)
}

/// Tab-separated status file, one row per record.
#[derive(Debug, Clone)]
pub struct TsvStatusWriter {
    path: PathBuf,
}

impl TsvStatusWriter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `{stem}_status.tsv` beside `input`.
    #[must_use]
    pub fn beside(input: &Path) -> Self {
        let stem = input
            .file_stem()
            .map_or_else(|| "harvest".into(), |s| s.to_string_lossy());
        Self::new(input.with_file_name(format!("{stem}_status.tsv")))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultWriter for TsvStatusWriter {
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), rows = results.len()))]
    async fn write_results(&self, results: &[PageResult]) -> Result<(), ReportError> {
        let content = render_status_table(results);
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| ReportError::io(&self.path, e))?;
        info!(path = %self.path.display(), "status file written");
        Ok(())
    }
}

/// Renders the status table, header included.
#[must_use]
pub fn render_status_table(results: &[PageResult]) -> String {
    let mut out = STATUS_COLUMNS.join("\t");
    out.push('\n');
    for result in results {
        let row = [
            result.source.index.to_string(),
            tsv_cell(&result.source.url),
            tsv_cell(&result.source.title),
            yes_no(result.success).to_string(),
            result.attachment_count.to_string(),
            yes_no(result.rendered).to_string(),
            tsv_cell(result.error.as_deref().unwrap_or("")),
            tsv_cell(result.render_error.as_deref().unwrap_or("")),
            result.completed_at.format(TIMESTAMP_FORMAT).to_string(),
        ];
        out.push_str(&row.join("\t"));
        out.push('\n');
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Flattens tabs and line breaks so a value stays in one cell.
fn tsv_cell(value: &str) -> String {
    value
        .chars()
        .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// Run totals in the JSON report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportTotals {
    pub records: usize,
    pub succeeded: usize,
    pub candidates: usize,
    pub materialized: usize,
    pub failed: usize,
    pub rendered: usize,
    pub discarded_links: usize,
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    completed_at: DateTime<Local>,
    output_dir: &'a Path,
    totals: ReportTotals,
    attachments: Vec<&'a Path>,
    failures: &'a [DownloadFailure],
    results: &'a [PageResult],
}

/// Computes the report totals for a run.
#[must_use]
pub fn totals(run: &HarvestRun) -> ReportTotals {
    ReportTotals {
        records: run.results.len(),
        succeeded: run.succeeded(),
        candidates: run.results.iter().map(|r| r.candidate_count).sum(),
        materialized: run.materialized.len(),
        failed: run.failures.len(),
        rendered: run.rendered(),
        discarded_links: run.discarded_links,
    }
}

/// Writes `harvest_report.json` into the output root.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    #[must_use]
    pub fn new(layout: &OutputLayout) -> Self {
        Self {
            path: layout.root().join(REPORT_FILE_NAME),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns [`ReportError`] if serialization or the write fails.
    pub async fn write(&self, run: &HarvestRun, layout: &OutputLayout) -> Result<(), ReportError> {
        let report = RunReport {
            completed_at: run.completed_at,
            output_dir: layout.root(),
            totals: totals(run),
            attachments: run
                .materialized
                .iter()
                .map(|file| file.resolved_path.as_path())
                .collect(),
            failures: &run.failures,
            results: &run.results,
        };
        let json = serde_json::to_string_pretty(&report)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| ReportError::io(&self.path, e))?;
        info!(path = %self.path.display(), "run report written");
        Ok(())
    }
}

/// Where a delivered run's output ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub report: PathBuf,
    pub archive: Option<PathBuf>,
}

/// Hands a finished run to its collaborators: status rows, the JSON report,
/// then packaging.
///
/// # Errors
///
/// Returns the first [`ReportError`] encountered.
pub async fn deliver(
    run: &HarvestRun,
    layout: &OutputLayout,
    writer: &dyn ResultWriter,
    packager: &dyn Packager,
) -> Result<Delivery, ReportError> {
    writer.write_results(&run.results).await?;

    let report = JsonReportWriter::new(layout);
    report.write(run, layout).await?;

    let archive = packager.package(layout).await?;
    if let Some(path) = &archive {
        info!(path = %path.display(), "output packaged");
    }

    Ok(Delivery {
        report: report.path().to_path_buf(),
        archive,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        AttachmentCandidate, FailureKind, MaterializedFile, NetworkFailure, SourceRecord,
    };
    use chrono::TimeZone;
    use std::io::Read;
    use tempfile::TempDir;

    fn sample_run(root: &Path) -> HarvestRun {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let ok = SourceRecord::new(1, "https://example.com/a", "Report");
        let bad = SourceRecord::new(2, "https://example.com/b", "Bad\ttitle");
        let candidate = AttachmentCandidate {
            url: "https://example.com/a.pdf".to_string(),
            filename_hint: "a.pdf".to_string(),
            source_title: "Report".to_string(),
            source_url: ok.url.clone(),
            source_index: 1,
            ordinal: 1,
        };
        let results = vec![
            PageResult {
                source: ok,
                success: true,
                candidate_count: 2,
                attachment_count: 1,
                failed_attachments: 1,
                rendered: false,
                error: None,
                error_kind: None,
                render_error: None,
                completed_at: at,
            },
            PageResult {
                source: bad,
                success: false,
                candidate_count: 0,
                attachment_count: 0,
                failed_attachments: 0,
                rendered: false,
                error: Some("HTTP 500\nretry".to_string()),
                error_kind: Some(FailureKind::Parse),
                render_error: None,
                completed_at: at,
            },
        ];
        HarvestRun {
            results,
            materialized: vec![MaterializedFile {
                candidate: candidate.clone(),
                resolved_path: root.join("attachments/Report_1_a.pdf"),
                bytes_written: 3,
                attempts_made: 1,
            }],
            failures: vec![DownloadFailure {
                candidate,
                kind: FailureKind::Network(NetworkFailure::Permanent),
                message: "HTTP 404".to_string(),
                attempts_made: 1,
            }],
            discarded_links: 4,
            completed_at: at,
        }
    }

    #[test]
    fn test_status_table_rows() {
        let run = sample_run(Path::new("/out"));
        let table = render_status_table(&run.results);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], STATUS_COLUMNS.join("\t"));
        assert_eq!(
            lines[1],
            "1\thttps://example.com/a\tReport\tyes\t1\tno\t\t\t2024-05-01 12:30:00"
        );
        let cells: Vec<_> = lines[2].split('\t').collect();
        assert_eq!(cells.len(), STATUS_COLUMNS.len());
        assert_eq!(cells[2], "Bad title");
        assert_eq!(cells[6], "HTTP 500 retry");
    }

    #[test]
    fn test_status_writer_beside_input() {
        let writer = TsvStatusWriter::beside(Path::new("/data/pages.tsv"));
        assert_eq!(writer.path(), Path::new("/data/pages_status.tsv"));
    }

    #[test]
    fn test_totals() {
        let run = sample_run(Path::new("/out"));
        let totals = totals(&run);
        assert_eq!(
            totals,
            ReportTotals {
                records: 2,
                succeeded: 1,
                candidates: 2,
                materialized: 1,
                failed: 1,
                rendered: 0,
                discarded_links: 4,
            }
        );
    }

    #[tokio::test]
    async fn test_deliver_writes_status_and_report() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let run = sample_run(dir.path());
        let writer = TsvStatusWriter::new(dir.path().join("status.tsv"));

        let delivery = deliver(&run, &layout, &writer, &NoPackaging).await.unwrap();

        assert!(delivery.archive.is_none());
        assert_eq!(delivery.report, dir.path().join(REPORT_FILE_NAME));
        assert!(writer.path().exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&delivery.report).unwrap()).unwrap();
        assert_eq!(json["totals"]["records"], 2);
        assert_eq!(json["failures"][0]["kind"]["kind"], "network");
        assert_eq!(json["failures"][0]["kind"]["detail"], "permanent");
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
        assert!(
            json["attachments"][0]
                .as_str()
                .unwrap()
                .ends_with("Report_1_a.pdf")
        );
    }

    #[tokio::test]
    async fn test_zip_packager_archives_both_folders() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path().join("run"));
        layout.prepare().await.unwrap();
        std::fs::write(layout.attachments_dir().join("Report_1_a.pdf"), b"pdf").unwrap();
        std::fs::write(layout.attachments_dir().join("Report_2_b.xlsx"), b"xlsx").unwrap();
        std::fs::write(layout.documents_dir().join("Report.html"), b"<p>").unwrap();
        std::fs::write(layout.root().join(REPORT_FILE_NAME), b"{}").unwrap();

        let archive = ZipPackager.package(&layout).await.unwrap().unwrap();

        assert_eq!(archive, dir.path().join("run.zip"));
        let mut zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<_> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "attachments/",
                "attachments/Report_1_a.pdf",
                "attachments/Report_2_b.xlsx",
                "documents/",
                "documents/Report.html",
            ]
        );
        let mut body = String::new();
        zip.by_name("attachments/Report_2_b.xlsx")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "xlsx");
    }

    #[tokio::test]
    async fn test_zip_packager_skips_missing_documents_folder() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path().join("run"));
        std::fs::create_dir_all(layout.attachments_dir()).unwrap();

        let archive = ZipPackager.package(&layout).await.unwrap().unwrap();

        let zip = zip::ZipArchive::new(std::fs::File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        assert_eq!(zip.file_names().next(), Some("attachments/"));
    }

    #[tokio::test]
    async fn test_status_writer_reports_io_error() {
        let dir = TempDir::new().unwrap();
        let writer = TsvStatusWriter::new(dir.path().join("missing/status.tsv"));
        let err = writer.write_results(&[]).await.unwrap_err();
        assert!(matches!(err, ReportError::Io { .. }));
    }
}
