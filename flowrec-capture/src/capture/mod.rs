//! Host integration: lifecycle hooks and flow ingestion

pub mod addon;
pub mod ingest;
pub mod recorder_trait;

pub use addon::{AddonStats, HttpRecorderAddon, ResponseOutcome};
pub use ingest::{FlowMessage, IngestStats};
pub use recorder_trait::FlowRecorderTrait;
