//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvester_core::HarvestConfig;

/// Harvest downloadable attachments from a list of web pages.
///
/// Reads a tab-separated file of page URLs and titles, downloads every
/// attachment linked from those pages, and writes a status file beside the
/// input plus a JSON report into the output directory. The output folders
/// are then zipped and the input is renamed with a processed marker.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Tab-separated input file (url and title columns)
    pub input: PathBuf,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output directory (default: <output_dir>/<YYYYmmdd_HHMM>)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Attempts per attachment, first try included (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: Option<u8>,

    /// Stop submitting downloads after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Save an HTML snapshot of every page
    #[arg(long)]
    pub render: bool,

    /// Leave the output folders unzipped
    #[arg(long)]
    pub no_archive: bool,

    /// Do not rename the input once the run finishes
    #[arg(long)]
    pub keep_input: bool,

    /// Run even if the input is already marked as processed
    #[arg(long)]
    pub force: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of file configuration.
    pub fn apply_to(&self, config: &mut HarvestConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = usize::from(concurrency);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = u32::from(attempts);
        }
        if self.deadline.is_some() {
            config.batch_deadline_secs = self.deadline;
        }
        if self.render {
            config.render_documents = true;
        }
        if self.no_archive {
            config.package_output = false;
        }
        if self.keep_input {
            config.mark_processed_input = false;
        }
    }
}
