//! # Scheduling Probe
//!
//! Optional capability for sampling OS-level context-switch counters around a
//! trial. On unix the counters come from `getrusage(RUSAGE_SELF)`; elsewhere no
//! probe is available and scheduling statistics are simply omitted from the
//! summary.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Voluntary and involuntary context-switch counts
///
/// Used both for absolute snapshots and for the delta across one trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSwitches {
    pub voluntary: u64,
    pub involuntary: u64,
}

impl ContextSwitches {
    /// Counter growth from `self` (before) to `later` (after)
    ///
    /// Counters are monotonic, but a saturating subtraction keeps a misbehaving
    /// source from producing wrapped values.
    pub fn delta_to(&self, later: &ContextSwitches) -> ContextSwitches {
        ContextSwitches {
            voluntary: later.voluntary.saturating_sub(self.voluntary),
            involuntary: later.involuntary.saturating_sub(self.involuntary),
        }
    }

    /// Whether the scheduler preempted the process at least once
    pub fn was_preempted(&self) -> bool {
        self.involuntary > 0
    }
}

/// Source of context-switch counters
pub trait SchedulingProbe: Send {
    /// Take an absolute snapshot of the counters
    fn snapshot(&self) -> Result<ContextSwitches>;

    /// Probe name for logging
    fn name(&self) -> &'static str;
}

/// `getrusage(RUSAGE_SELF)` based probe
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct RusageProbe;

#[cfg(unix)]
impl SchedulingProbe for RusageProbe {
    fn snapshot(&self) -> Result<ContextSwitches> {
        use nix::sys::resource::{getrusage, UsageWho};

        let usage = getrusage(UsageWho::RUSAGE_SELF)?;
        Ok(ContextSwitches {
            voluntary: usage.voluntary_context_switches().max(0) as u64,
            involuntary: usage.involuntary_context_switches().max(0) as u64,
        })
    }

    fn name(&self) -> &'static str {
        "getrusage"
    }
}

/// Find a working probe for this platform
///
/// A probe is only returned after it has produced one successful snapshot, so
/// callers never have to handle a probe that is structurally unavailable.
pub fn detect() -> Option<Box<dyn SchedulingProbe>> {
    #[cfg(unix)]
    {
        let probe = RusageProbe;
        match probe.snapshot() {
            Ok(_) => return Some(Box::new(probe)),
            Err(e) => debug!("Scheduling probe '{}' unavailable: {}", probe.name(), e),
        }
    }
    debug!("No scheduling probe available on this platform");
    None
}
