//! Harness-level error types.
//!
//! Per-item failures (transcode/evaluation) are NOT errors at this level:
//! they are captured in the item's `RunRecord`. `HarnessError` covers the
//! harness's own infrastructure: scratch storage, file list, output files.

use shared_utils::TemplateError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Scratch root missing, not a directory, or not writable. Fatal at
    /// startup; per-item instances are recorded as staging failures.
    #[error("scratch storage unavailable at {}: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    /// Scratch region could not be removed. Never fatal.
    #[error("failed to clean up scratch region {}: {source}", path.display())]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read file list {}: {source}", path.display())]
    FileList {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Result files of an earlier run with the same name. Fatal at startup.
    #[error("results already exist at {}, choose another run name", path.display())]
    RunExists { path: PathBuf },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
