//! Recorder trait used by the addon to persist flows

use flowrec_core::{AddOutcome, FlowRecord, Recorder, SessionSummary};
use std::path::Path;

/// Trait for a recording backend driven by the addon
pub trait FlowRecorderTrait: Send + Sync {
    /// Destination the backend writes to
    fn path(&self) -> &Path;

    /// Persist one flow
    fn add_flow(&self, flow: FlowRecord) -> flowrec_core::Result<AddOutcome>;

    /// Flush and close; repeated calls return the same summary
    fn finish(&self) -> flowrec_core::Result<SessionSummary>;

    /// Totals so far
    fn summary(&self) -> SessionSummary;
}

impl FlowRecorderTrait for Recorder {
    fn path(&self) -> &Path {
        Recorder::path(self)
    }

    fn add_flow(&self, flow: FlowRecord) -> flowrec_core::Result<AddOutcome> {
        Recorder::add_flow(self, flow)
    }

    fn finish(&self) -> flowrec_core::Result<SessionSummary> {
        Recorder::finish(self)
    }

    fn summary(&self) -> SessionSummary {
        Recorder::summary(self)
    }
}
