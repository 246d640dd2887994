//! Run configuration loaded from TOML and overridden by CLI flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::download::RetryPolicy;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Upper bound for the per-request timeout.
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Upper bound for attempts per candidate.
const MAX_ATTEMPTS: u32 = 10;

/// Default attempts per candidate, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between attempts in seconds.
pub const DEFAULT_RETRY_BASE_DELAY_SECS: f64 = 1.0;

const DEFAULT_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".rar", ".7z", ".tar",
    ".gz", ".txt", ".csv",
];

const DEFAULT_KEYWORDS: &[&str] = &[
    "下载",
    "download",
    "附件",
    "attachment",
    "文件",
    "file",
    "pdf",
    "doc",
    "docx",
    "xls",
    "xlsx",
    "ppt",
    "pptx",
];

const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
];

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected {expected}")]
    OutOfRange {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(key: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            key,
            value: value.to_string(),
            expected,
        }
    }
}

/// Settings for one harvest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Maximum concurrent attachment transfers.
    pub concurrency: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts per candidate, including the first.
    pub max_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n × base`.
    pub retry_base_delay_secs: f64,
    /// Path suffixes that mark a link as an attachment.
    pub attachment_extensions: Vec<String>,
    /// Link-text keywords that mark a link as an attachment.
    pub attachment_keywords: Vec<String>,
    /// User-Agent pool rotated per request.
    pub user_agents: Vec<String>,
    pub accept: String,
    pub accept_language: String,
    /// Root of the run's output tree.
    pub output_dir: PathBuf,
    /// Hand each page to the document renderer after downloading.
    pub render_documents: bool,
    /// Stop submitting new transfers once this many seconds have passed.
    pub batch_deadline_secs: Option<u64>,
    /// Zip the attachments and documents folders after delivery.
    pub package_output: bool,
    /// Rename a finished input so later runs skip it.
    pub mark_processed_input: bool,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_secs: DEFAULT_RETRY_BASE_DELAY_SECS,
            attachment_extensions: to_strings(DEFAULT_EXTENSIONS),
            attachment_keywords: to_strings(DEFAULT_KEYWORDS),
            user_agents: to_strings(DEFAULT_USER_AGENTS),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            output_dir: PathBuf::from("downloads"),
            render_documents: false,
            batch_deadline_secs: None,
            package_output: true,
            mark_processed_input: true,
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

impl HarvestConfig {
    /// Loads a TOML config file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or
    /// holds out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::out_of_range(
                "concurrency",
                self.concurrency,
                "1..=100",
            ));
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(ConfigError::out_of_range(
                "timeout_secs",
                self.timeout_secs,
                "1..=3600",
            ));
        }
        if !(1..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::out_of_range(
                "max_attempts",
                self.max_attempts,
                "1..=10",
            ));
        }
        if !self.retry_base_delay_secs.is_finite() || self.retry_base_delay_secs < 0.0 {
            return Err(ConfigError::out_of_range(
                "retry_base_delay_secs",
                self.retry_base_delay_secs,
                "a non-negative number of seconds",
            ));
        }
        if self.batch_deadline_secs == Some(0) {
            return Err(ConfigError::out_of_range(
                "batch_deadline_secs",
                0,
                "a positive number of seconds",
            ));
        }
        Ok(())
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Batch deadline, when configured.
    #[must_use]
    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }

    /// Retry policy derived from the attempt count and base delay.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs_f64(self.retry_base_delay_secs.max(0.0)),
        )
    }

    /// Extensions lower-cased and dot-prefixed, blanks dropped.
    #[must_use]
    pub fn normalized_extensions(&self) -> Vec<String> {
        self.attachment_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty() && ext != ".")
            .map(|ext| {
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect()
    }

    /// Keywords lower-cased, blanks dropped.
    #[must_use]
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.attachment_keywords
            .iter()
            .map(|kw| kw.trim().to_lowercase())
            .filter(|kw| !kw.is_empty())
            .collect()
    }
}
