//! Error types for recording operations

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecorderError>;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Cannot open record destination {path}: {source}")]
    Config {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid record destination {path:?}: {reason}")]
    InvalidDestination { path: PathBuf, reason: String },

    #[error("Existing record file {path} is corrupt: {source}")]
    CorruptDestination {
        path: PathBuf,
        source: CodecError,
    },

    #[error("Recorder lifecycle violation: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Record encoding error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// True for failures raised while opening the destination
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::InvalidDestination { .. } | Self::CorruptDestination { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("recorder used before open()")]
    NotOpen,

    #[error("recorder used after finish()")]
    Finished,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[source] bincode::Error),

    #[error("Record of {size} bytes exceeds the {max} byte frame limit")]
    TooLarge { size: usize, max: usize },

    #[error("Corrupt record at byte offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: CorruptReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptReason {
    #[error("bad frame magic")]
    BadMagic,

    #[error("frame length {0} exceeds limit")]
    Oversize(u32),

    #[error("checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    Checksum { stored: u32, computed: u32 },

    #[error("undecodable payload: {0}")]
    Payload(String),
}
