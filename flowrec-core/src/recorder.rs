//! Recording session: lifecycle, serialization and flush policy

use crate::codec;
use crate::error::{LifecycleError, Result};
use crate::record::{FlowRecord, SkipReason};
use crate::sink::{RecordSink, SinkOptions};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// When buffered records are forced to stable storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Only when the session finishes
    #[default]
    OnClose,
    /// After every appended record
    EveryRecord,
    /// After every `n` appended records
    EveryN(u32),
}

impl FlushPolicy {
    fn due(&self, since_flush: u32) -> bool {
        match *self {
            FlushPolicy::OnClose => false,
            FlushPolicy::EveryRecord => true,
            FlushPolicy::EveryN(n) => since_flush >= n.max(1),
        }
    }
}

/// Fully resolved recorder settings, fixed for the recorder's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub path: PathBuf,
    pub flush_policy: FlushPolicy,
    pub repair_torn_tail: bool,
}

impl RecorderConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_policy: FlushPolicy::default(),
            repair_torn_tail: true,
        }
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn with_repair_torn_tail(mut self, repair: bool) -> Self {
        self.repair_torn_tail = repair;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Uninitialized,
    Open,
    Finished,
}

/// Result of handing a flow to the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended as the `index`-th record of the session
    Recorded { index: u64 },
    /// Refused because the flow is not persistable
    Skipped(SkipReason),
}

/// Running totals for one recording session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub records: u64,
    pub skipped: u64,
    pub bytes_written: u64,
    pub request_body_bytes: u64,
    pub response_body_bytes: u64,
    pub first_capture: Option<DateTime<Utc>>,
    pub last_capture: Option<DateTime<Utc>>,
}

impl SessionSummary {
    fn update(&mut self, flow: &FlowRecord, frame_len: usize) {
        self.records += 1;
        self.bytes_written += frame_len as u64;
        self.request_body_bytes += flow.request.body_len();
        self.response_body_bytes += flow.response.as_ref().map_or(0, |r| r.body_len());
        if self.first_capture.is_none() {
            self.first_capture = Some(flow.timestamp);
        }
        self.last_capture = Some(flow.timestamp);
    }

    pub fn body_bytes(&self) -> u64 {
        self.request_body_bytes + self.response_body_bytes
    }
}

enum Phase {
    Uninitialized,
    Open(RecordSink),
    Finished,
}

struct Inner {
    phase: Phase,
    summary: SessionSummary,
    since_flush: u32,
}

/// Persists accepted flows to a single append-only record file
///
/// All methods take `&self`; one internal lock serializes appends, so the
/// recorder can be shared across threads behind an `Arc`. Records land in
/// the file in the order their `add_flow` calls acquired that lock.
pub struct Recorder {
    config: RecorderConfig,
    inner: Mutex<Inner>,
}

impl Recorder {
    /// Create an unopened recorder; no I/O happens until `open`
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Uninitialized,
                summary: SessionSummary::default(),
                since_flush: 0,
            }),
        }
    }

    /// Create and open a recorder in one step
    pub fn create(config: RecorderConfig) -> Result<Self> {
        let recorder = Self::new(config);
        recorder.open()?;
        Ok(recorder)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> RecorderState {
        match self.inner.lock().phase {
            Phase::Uninitialized => RecorderState::Uninitialized,
            Phase::Open(_) => RecorderState::Open,
            Phase::Finished => RecorderState::Finished,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        self.inner.lock().summary.clone()
    }

    /// Open the destination; a failure leaves the recorder unopened
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Uninitialized => {
                let sink = RecordSink::open_with(
                    &self.config.path,
                    SinkOptions {
                        repair_torn_tail: self.config.repair_torn_tail,
                    },
                )?;
                inner.phase = Phase::Open(sink);
                Ok(())
            }
            Phase::Open(_) => Ok(()),
            Phase::Finished => Err(LifecycleError::Finished.into()),
        }
    }

    /// Append one flow to the session
    ///
    /// Flows with an error or without a response are skipped and never
    /// reach the file. Write failures are returned, not retried, and the
    /// failed flow is not counted in the summary. Lifecycle errors take
    /// precedence over skipping and over encoding errors.
    pub fn add_flow(&self, flow: FlowRecord) -> Result<AddOutcome> {
        // Encoding happens outside the lock; the phase is checked again below
        self.ensure_open()?;
        let frame = match flow.check_recordable() {
            Ok(()) => Ok(codec::encode(&flow)?),
            Err(reason) => Err(reason),
        };

        let mut guard = self.inner.lock();
        let Inner {
            phase,
            summary,
            since_flush,
        } = &mut *guard;
        let sink = match phase {
            Phase::Open(sink) => sink,
            Phase::Uninitialized => return Err(LifecycleError::NotOpen.into()),
            Phase::Finished => return Err(LifecycleError::Finished.into()),
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(reason) => {
                summary.skipped += 1;
                return Ok(AddOutcome::Skipped(reason));
            }
        };

        sink.append(&frame)?;
        *since_flush += 1;
        if self.config.flush_policy.due(*since_flush) {
            sink.flush()?;
            *since_flush = 0;
        }

        let index = summary.records;
        summary.update(&flow, frame.len());
        Ok(AddOutcome::Recorded { index })
    }

    fn ensure_open(&self) -> Result<()> {
        match self.inner.lock().phase {
            Phase::Open(_) => Ok(()),
            Phase::Uninitialized => Err(LifecycleError::NotOpen.into()),
            Phase::Finished => Err(LifecycleError::Finished.into()),
        }
    }

    /// Force appended records to stable storage without ending the session
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let Inner {
            phase, since_flush, ..
        } = &mut *guard;
        match phase {
            Phase::Open(sink) => {
                sink.flush()?;
                *since_flush = 0;
                Ok(())
            }
            Phase::Uninitialized => Err(LifecycleError::NotOpen.into()),
            Phase::Finished => Err(LifecycleError::Finished.into()),
        }
    }

    /// Flush and close the destination, ending the session
    ///
    /// Safe to call repeatedly: later calls return the same summary. The
    /// recorder is finished even if the final flush fails.
    pub fn finish(&self) -> Result<SessionSummary> {
        let mut inner = self.inner.lock();
        if let Phase::Open(mut sink) = std::mem::replace(&mut inner.phase, Phase::Finished) {
            sink.close()?;
        }
        Ok(inner.summary.clone())
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("path", &self.config.path)
            .field("state", &self.state())
            .finish()
    }
}
