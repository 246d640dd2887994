//! CLI entry point for the harvester tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use harvester_core::{
    DelimitedTextSource, DocumentRenderer, HarvestConfig, HarvestOrchestrator,
    HtmlSnapshotRenderer, NoPackaging, OutputLayout, Packager, TsvStatusWriter, ZipPackager,
    deliver,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Harvester starting");

    let mut config = match &args.config {
        Some(path) => HarvestConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => HarvestConfig::default(),
    };
    args.apply_to(&mut config);

    let source = DelimitedTextSource::new(&args.input);
    if source.is_processed() && !args.force {
        info!(
            input = %args.input.display(),
            "Input already processed, skipping (use --force to rerun)"
        );
        return Ok(());
    }

    let layout = if args.output_dir.is_some() {
        OutputLayout::new(&config.output_dir)
    } else {
        OutputLayout::timestamped(&config.output_dir)
    };

    let renderer: Option<Arc<dyn DocumentRenderer>> = if config.render_documents {
        Some(Arc::new(HtmlSnapshotRenderer))
    } else {
        None
    };

    let packager: &dyn Packager = if config.package_output {
        &ZipPackager
    } else {
        &NoPackaging
    };
    let mark_input = config.mark_processed_input;

    let orchestrator = HarvestOrchestrator::new(config, renderer)?.with_layout(layout.clone());
    let run = orchestrator
        .run_from_source(&source)
        .await
        .with_context(|| format!("harvesting {}", args.input.display()))?;

    let writer = TsvStatusWriter::beside(&args.input);
    let delivery = deliver(&run, &layout, &writer, packager).await?;

    if mark_input {
        match source.mark_processed().await {
            Ok(marked) => debug!(path = %marked.display(), "input renamed"),
            Err(e) => warn!(error = %e, "input left unmarked"),
        }
    }

    info!(
        records = run.results.len(),
        succeeded = run.succeeded(),
        attachments = run.materialized.len(),
        failed = run.failures.len(),
        rendered = run.rendered(),
        status = %writer.path().display(),
        report = %delivery.report.display(),
        archive = ?delivery.archive,
        "Harvest complete"
    );

    Ok(())
}
