//! Capture host for the flow recorder
//!
//! Wires a proxy engine's completed flows into `flowrec_core::Recorder`:
//! TOML configuration, host filtering, the addon lifecycle and NDJSON
//! ingestion of exported flows.

pub mod capture;
pub mod config;
pub mod error;
pub mod filter;

// Re-export commonly used types
pub use capture::{
    AddonStats, FlowMessage, FlowRecorderTrait, HttpRecorderAddon, IngestStats, ResponseOutcome,
};
pub use config::{Config, ConfigLoader, ConfigValidator, FilterConfig, FlushMode, RecorderSection};
pub use error::{CaptureError, Result, ValidationError};
pub use filter::{FilterDecision, FlowFilter, HostMatcher};
