//! Write-side core of an intercepting HTTP traffic recorder
//!
//! Accepts completed request/response flows, frames each one as a
//! self-delimiting checksummed record and appends it to a single file.
//! A finished session is always fully flushed; a crash can only lose
//! records that were never flushed, and never corrupts earlier ones.

pub mod codec;
pub mod error;
pub mod record;
pub mod recorder;
pub mod sink;

// Re-export commonly used types
pub use codec::{decode_stream, encode, scan, scan_reader, RecordStream, ScanReport};
pub use error::{CodecError, CorruptReason, LifecycleError, RecorderError, Result};
pub use record::{
    FlowError, FlowRecord, Headers, HttpVersion, Request, Response, SkipReason, Timings,
};
pub use recorder::{
    AddOutcome, FlushPolicy, Recorder, RecorderConfig, RecorderState, SessionSummary,
};
pub use sink::{RecordSink, SinkOptions};
