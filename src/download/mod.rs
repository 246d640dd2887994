//! Concurrent attachment materialization.
//!
//! This module turns ordinal-stamped candidates into files on disk.
//!
//! # Features
//!
//! - Semaphore-bounded worker tasks (1-100)
//! - Linear-backoff retry for transient failures, none for permanent ones
//! - Deterministic `{title}_{ordinal}_{hint}` names
//! - Collision handling by exclusive create with numeric suffixes
//! - Optional batch deadline that stops submitting new work

mod constants;
mod engine;
mod filename;
mod retry;

pub use constants::MAX_FILE_NAME_BYTES;
pub use engine::{BatchOutcome, DownloadEngine, DownloadStats, EngineError};
pub use filename::{
    compose_file_name, extension_from_url, name_from_url, reserve_unique_path,
    sanitize_component, synthesized_name, truncate_bytes,
};
pub use retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
