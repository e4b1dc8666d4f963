//! Error types for the capture host

use flowrec_core::RecorderError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Recorder not configured: no destination has been set")]
    NotConfigured,

    #[error("Cannot move recording from {current} to {requested} after flows were recorded")]
    Reconfigure { current: PathBuf, requested: PathBuf },

    #[error("Malformed flow message on line {line}: {reason}")]
    Ingest { line: usize, reason: String },

    #[error("Recorder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Record destination must not be empty")]
    EmptyDestination,

    #[error("Invalid flush mode: {mode}")]
    InvalidFlushMode { mode: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid wildcard pattern: {pattern}")]
    InvalidPattern { pattern: String },
}
