//! # Trial Sample Records
//!
//! A `SampleRecord` captures the outcome of exactly one trial: when it started,
//! how long it took, how many response bytes were drained, and either the
//! negotiated protocol label or the classified failure. Records are created by
//! the trial runner and never mutated afterwards, so every field is private
//! and only reachable through accessors.

use crate::probe::ContextSwitches;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification of a failed trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureKind {
    /// The transport could not establish or reuse a connection
    Connection,
    /// The per-trial timeout elapsed before the exchange completed
    Timeout,
    /// The response body could not be fully drained
    Read,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Connection => write!(f, "ConnectionError"),
            FailureKind::Timeout => write!(f, "TimeoutError"),
            FailureKind::Read => write!(f, "ReadError"),
        }
    }
}

/// Why a trial failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&TransportError> for TrialFailure {
    fn from(error: &TransportError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a single trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    index: usize,
    started_at: chrono::DateTime<chrono::Utc>,
    offset: Duration,
    elapsed: Duration,
    bytes: u64,
    protocol: Option<String>,
    failure: Option<TrialFailure>,
    context_switches: Option<ContextSwitches>,
}

impl SampleRecord {
    /// Record a trial that drained the full response body
    ///
    /// `offset` is the monotonic distance between the start of the run and
    /// the start of this trial.
    pub fn success(
        index: usize,
        started_at: chrono::DateTime<chrono::Utc>,
        offset: Duration,
        elapsed: Duration,
        bytes: u64,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            index,
            started_at,
            offset,
            elapsed,
            bytes,
            protocol: Some(protocol.into()),
            failure: None,
            context_switches: None,
        }
    }

    /// Record a failed trial. Any partially drained bytes are discarded.
    pub fn failure(
        index: usize,
        started_at: chrono::DateTime<chrono::Utc>,
        offset: Duration,
        elapsed: Duration,
        failure: TrialFailure,
    ) -> Self {
        Self {
            index,
            started_at,
            offset,
            elapsed,
            bytes: 0,
            protocol: None,
            failure: Some(failure),
            context_switches: None,
        }
    }

    /// Attach the context-switch delta observed across the trial
    pub fn with_context_switches(mut self, delta: ContextSwitches) -> Self {
        self.context_switches = Some(delta);
        self
    }

    /// Zero-based position of the trial within its phase
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Response bytes drained; always zero for failed trials
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&TrialFailure> {
        self.failure.as_ref()
    }

    pub fn context_switches(&self) -> Option<ContextSwitches> {
        self.context_switches
    }
}
