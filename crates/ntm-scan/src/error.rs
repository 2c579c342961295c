//! Error types for the ntm-scan crate.

use thiserror::Error;

use ntm_core::types::ScanId;
use ntm_core::StoreError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("scan process failed (exit code {code:?}): {stderr}")]
    ExecutionFailed { code: Option<i32>, stderr: String },

    #[error("no scan found for id {id}")]
    ScanNotFound { id: ScanId },

    #[error("malformed scan report: {0}")]
    MalformedReport(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
