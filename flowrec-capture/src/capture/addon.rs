//! Lifecycle shim between a proxy engine and the recorder
//!
//! The proxy calls `configure` once options are known, `response` for every
//! completed flow and `done` at shutdown. Recording failures are logged and
//! counted here; they never reach the proxy's traffic path.

use super::recorder_trait::FlowRecorderTrait;
use crate::config::schema::RecorderSection;
use crate::error::{CaptureError, Result};
use crate::filter::{FilterDecision, FlowFilter};
use flowrec_core::{AddOutcome, FlowRecord, Recorder, SessionSummary, SkipReason};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one flow handed to `response`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Recorded { index: u64 },
    Filtered(FilterDecision),
    Skipped(SkipReason),
    Failed,
}

/// Counters kept across the addon's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddonStats {
    pub seen: u64,
    pub recorded: u64,
    pub filtered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    seen: AtomicU64,
    recorded: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
}

pub struct HttpRecorderAddon {
    filter: FlowFilter,
    recorder: RwLock<Option<Arc<dyn FlowRecorderTrait>>>,
    counters: Counters,
}

impl HttpRecorderAddon {
    pub fn new(filter: FlowFilter) -> Self {
        Self {
            filter,
            recorder: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    /// Open a recorder for the configured destination
    ///
    /// Re-configuring with the same destination is a no-op. Moving to a
    /// new destination is allowed until the first flow has been recorded;
    /// the previous recorder is finished once in-flight flows complete.
    pub fn configure(&self, section: &RecorderSection) -> Result<()> {
        let config = section.to_recorder_config()?;
        let mut slot = self.recorder.write();

        if let Some(current) = slot.as_ref() {
            if current.path() == config.path.as_path() {
                debug!("Recorder already writing to {:?}", config.path);
                return Ok(());
            }
            if current.summary().records > 0 {
                return Err(CaptureError::Reconfigure {
                    current: current.path().to_path_buf(),
                    requested: config.path,
                });
            }
        }

        let recorder = Recorder::create(config)?;
        info!(
            "Recording flows to {:?} (flush: {})",
            recorder.path(),
            section.flush
        );

        if let Some(previous) = slot.replace(Arc::new(recorder)) {
            if let Err(e) = previous.finish() {
                warn!("Failed to close previous recording {:?}: {}", previous.path(), e);
            }
        }
        Ok(())
    }

    /// Use an already constructed recording backend
    pub fn install(&self, recorder: Arc<dyn FlowRecorderTrait>) {
        *self.recorder.write() = Some(recorder);
    }

    pub fn is_configured(&self) -> bool {
        self.recorder.read().is_some()
    }

    /// Filter and record a completed flow, surfacing any recording error
    pub fn try_response(&self, flow: FlowRecord) -> Result<ResponseOutcome> {
        self.counters.seen.fetch_add(1, Ordering::Relaxed);

        let decision = self.filter.decide(&flow);
        if !decision.is_record() {
            debug!("Not recording flow {} to {}: {}", flow.id, flow.host(), decision);
            self.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return Ok(ResponseOutcome::Filtered(decision));
        }

        // Held across the append so `configure` cannot finish this recorder mid-write
        let slot = self.recorder.read();
        let result = match slot.as_ref() {
            Some(recorder) => recorder.add_flow(flow).map_err(CaptureError::from),
            None => Err(CaptureError::NotConfigured),
        };
        drop(slot);

        match result {
            Ok(AddOutcome::Recorded { index }) => {
                self.counters.recorded.fetch_add(1, Ordering::Relaxed);
                Ok(ResponseOutcome::Recorded { index })
            }
            Ok(AddOutcome::Skipped(reason)) => {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                Ok(ResponseOutcome::Skipped(reason))
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Proxy response hook: recording errors are logged, never returned
    pub fn response(&self, flow: FlowRecord) -> ResponseOutcome {
        let id = flow.id.clone();
        match self.try_response(flow) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to record flow {}: {}", id, e);
                ResponseOutcome::Failed
            }
        }
    }

    /// Shutdown hook: flush and close the recording
    ///
    /// Returns `None` when no recorder was ever configured. Later calls
    /// return the same summary.
    pub fn done(&self) -> Result<Option<SessionSummary>> {
        let recorder = self.recorder.read().clone();
        let Some(recorder) = recorder else {
            debug!("Recorder never configured, nothing to finish");
            return Ok(None);
        };

        let summary = recorder.finish()?;
        let stats = self.stats();
        info!(
            "Recorded {} flows ({} body bytes) to {:?}; {} filtered, {} failed",
            summary.records,
            summary.body_bytes(),
            recorder.path(),
            stats.filtered,
            stats.failed
        );
        Ok(Some(summary))
    }

    pub fn stats(&self) -> AddonStats {
        AddonStats {
            seen: self.counters.seen.load(Ordering::Relaxed),
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            filtered: self.counters.filtered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
