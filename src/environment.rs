//! # Environment Controller
//!
//! Puts the process into "low-noise mode" before a timing-sensitive run and
//! takes it out again afterwards. Three independent, best-effort steps are
//! applied in order:
//!
//! 1. **Memory reclamation**: the allocator stops handing freed memory back to
//!    the OS mid-run (glibc trim threshold), so no trimming work lands inside a
//!    measured trial.
//! 2. **Core pinning**: the process is restricted to a single logical core to
//!    avoid inter-core migration.
//! 3. **Priority**: the highest permitted scheduling priority is requested.
//!
//! A step that fails (usually for lack of privilege) produces an
//! `EnvironmentWarning` that is logged and kept on the guard. It never aborts
//! the run. Dropping or restoring the `LowNoiseGuard` reverses the applied
//! steps in reverse order, so repeated and nested guards compose.
//!
//! ## Limitations
//!
//! - glibc does not expose the current `M_TRIM_THRESHOLD`, so restoring sets
//!   its documented 128 KiB default rather than the prior value. Any explicit
//!   `mallopt(M_TRIM_THRESHOLD)` also disables glibc's dynamic trim and mmap
//!   thresholds for the rest of the process, so allocator behaviour after the
//!   first guard is not identical to a process that never entered one.
//! - Off Linux the current core set cannot be read, so pinning is applied but
//!   not undone.

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

/// glibc's default `M_TRIM_THRESHOLD`
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const DEFAULT_TRIM_THRESHOLD: libc::c_int = 128 * 1024;

/// Non-fatal failure of one environment step
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentWarning {
    #[error("could not suspend memory reclamation: {0}")]
    Reclamation(String),

    #[error("could not pin to logical core {core}: {reason}")]
    Affinity { core: usize, reason: String },

    #[error("could not set scheduling priority {nice}: {reason}")]
    Priority { nice: i32, reason: String },

    #[error("could not restore {step}: {reason}")]
    Restore { step: &'static str, reason: String },
}

/// Which low-noise steps to attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub suspend_reclamation: bool,
    pub pin_to_core: bool,
    /// Core to pin to; the first available core when unset
    pub core: Option<usize>,
    /// Nice value to request; priority is left alone when unset
    pub priority: Option<i32>,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            suspend_reclamation: true,
            pin_to_core: true,
            core: None,
            priority: Some(crate::defaults::PRIORITY),
        }
    }
}

impl EnvironmentSettings {
    /// Settings that leave the environment untouched
    pub fn disabled() -> Self {
        Self {
            suspend_reclamation: false,
            pin_to_core: false,
            core: None,
            priority: None,
        }
    }
}

/// OS-facing operations used by the controller
///
/// `SystemOps` is the real implementation; tests substitute a recorder.
pub trait EnvironmentOps: Send + Sync {
    fn suspend_reclamation(&self) -> Result<()>;
    fn resume_reclamation(&self) -> Result<()>;
    /// Run one explicit reclamation pass
    fn reclaim(&self) -> Result<()>;
    /// Current core set, or `None` when it cannot be queried
    fn affinity(&self) -> Result<Option<Vec<usize>>>;
    fn set_affinity(&self, cores: &[usize]) -> Result<()>;
    fn default_core(&self) -> Option<usize>;
    fn priority(&self) -> Result<i32>;
    fn set_priority(&self, nice: i32) -> Result<()>;
}

/// Operations against the running process
#[derive(Debug, Default)]
pub struct SystemOps;

impl EnvironmentOps for SystemOps {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn suspend_reclamation(&self) -> Result<()> {
        // SAFETY: mallopt only adjusts allocator tunables.
        let ok = unsafe { libc::mallopt(libc::M_TRIM_THRESHOLD, libc::c_int::MAX) };
        if ok == 1 {
            Ok(())
        } else {
            anyhow::bail!("mallopt(M_TRIM_THRESHOLD) rejected")
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn suspend_reclamation(&self) -> Result<()> {
        anyhow::bail!("allocator trim control is unsupported on this platform")
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn resume_reclamation(&self) -> Result<()> {
        // SAFETY: see suspend_reclamation.
        let ok = unsafe { libc::mallopt(libc::M_TRIM_THRESHOLD, DEFAULT_TRIM_THRESHOLD) };
        if ok == 1 {
            Ok(())
        } else {
            anyhow::bail!("mallopt(M_TRIM_THRESHOLD) rejected")
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn resume_reclamation(&self) -> Result<()> {
        Ok(())
    }

    fn reclaim(&self) -> Result<()> {
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        {
            // SAFETY: malloc_trim has no preconditions.
            let released = unsafe { libc::malloc_trim(0) };
            debug!("malloc_trim released memory: {}", released == 1);
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn affinity(&self) -> Result<Option<Vec<usize>>> {
        use nix::sched::{sched_getaffinity, CpuSet};
        use nix::unistd::Pid;

        let set = sched_getaffinity(Pid::from_raw(0))?;
        let mut cores = Vec::new();
        for core in 0..CpuSet::count() {
            if set.is_set(core)? {
                cores.push(core);
            }
        }
        Ok(Some(cores))
    }

    #[cfg(not(target_os = "linux"))]
    fn affinity(&self) -> Result<Option<Vec<usize>>> {
        Ok(None)
    }

    #[cfg(target_os = "linux")]
    fn set_affinity(&self, cores: &[usize]) -> Result<()> {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        for &core in cores {
            set.set(core)?;
        }
        sched_setaffinity(Pid::from_raw(0), &set)?;
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_affinity(&self, cores: &[usize]) -> Result<()> {
        match cores {
            [core] => {
                if core_affinity::set_for_current(core_affinity::CoreId { id: *core }) {
                    Ok(())
                } else {
                    anyhow::bail!("core_affinity refused core {}", core)
                }
            }
            _ => anyhow::bail!("only single-core affinity is supported on this platform"),
        }
    }

    fn default_core(&self) -> Option<usize> {
        core_affinity::get_core_ids()?.first().map(|core| core.id)
    }

    #[cfg(unix)]
    fn priority(&self) -> Result<i32> {
        // getpriority may legitimately return -1, so errno decides.
        nix::errno::Errno::clear();
        // SAFETY: plain syscall wrapper.
        let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
        if nice == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error().unwrap_or(0) != 0 {
                return Err(err.into());
            }
        }
        Ok(nice)
    }

    #[cfg(not(unix))]
    fn priority(&self) -> Result<i32> {
        anyhow::bail!("process priority is unsupported on this platform")
    }

    #[cfg(unix)]
    fn set_priority(&self, nice: i32) -> Result<()> {
        // SAFETY: plain syscall wrapper.
        let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
        nix::errno::Errno::result(ret)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_priority(&self, _nice: i32) -> Result<()> {
        anyhow::bail!("process priority is unsupported on this platform")
    }
}

/// A step that was applied and must be undone
#[derive(Debug, Clone, PartialEq, Eq)]
enum AppliedStep {
    Reclamation,
    Affinity(Option<Vec<usize>>),
    Priority(i32),
}

/// Configures and restores the measurement environment
pub struct EnvironmentController {
    settings: EnvironmentSettings,
    ops: Box<dyn EnvironmentOps>,
}

impl EnvironmentController {
    pub fn new(settings: EnvironmentSettings) -> Self {
        Self::with_ops(settings, Box::new(SystemOps))
    }

    pub fn with_ops(settings: EnvironmentSettings, ops: Box<dyn EnvironmentOps>) -> Self {
        Self { settings, ops }
    }

    /// Enter low-noise mode
    ///
    /// Each step is attempted independently; failures are logged and
    /// collected on the guard.
    pub fn prepare(&self) -> LowNoiseGuard<'_> {
        let mut guard = LowNoiseGuard {
            ops: self.ops.as_ref(),
            applied: Vec::new(),
            warnings: Vec::new(),
        };

        if self.settings.suspend_reclamation {
            match self.ops.suspend_reclamation() {
                Ok(()) => {
                    info!("Memory reclamation suspended for the run");
                    guard.applied.push(AppliedStep::Reclamation);
                }
                Err(e) => guard.warn(EnvironmentWarning::Reclamation(e.to_string())),
            }
        }

        if self.settings.pin_to_core {
            match self.settings.core.or_else(|| self.ops.default_core()) {
                Some(core) => self.pin(core, &mut guard),
                None => guard.warn(EnvironmentWarning::Affinity {
                    core: 0,
                    reason: "no logical cores reported".to_string(),
                }),
            }
        }

        if let Some(nice) = self.settings.priority {
            self.raise_priority(nice, &mut guard);
        }

        guard
    }

    fn pin(&self, core: usize, guard: &mut LowNoiseGuard<'_>) {
        let previous = match self.ops.affinity() {
            Ok(previous) => previous,
            Err(e) => {
                debug!("Could not read current affinity: {}", e);
                None
            }
        };
        match self.ops.set_affinity(&[core]) {
            Ok(()) => {
                info!("Pinned to logical core {}", core);
                guard.applied.push(AppliedStep::Affinity(previous));
            }
            Err(e) => guard.warn(EnvironmentWarning::Affinity {
                core,
                reason: e.to_string(),
            }),
        }
    }

    fn raise_priority(&self, nice: i32, guard: &mut LowNoiseGuard<'_>) {
        let previous = match self.ops.priority() {
            Ok(previous) => previous,
            Err(e) => {
                guard.warn(EnvironmentWarning::Priority {
                    nice,
                    reason: e.to_string(),
                });
                return;
            }
        };
        match self.ops.set_priority(nice) {
            Ok(()) => {
                info!("Scheduling priority set to nice {}", nice);
                guard.applied.push(AppliedStep::Priority(previous));
            }
            Err(e) => guard.warn(EnvironmentWarning::Priority {
                nice,
                reason: e.to_string(),
            }),
        }
    }

    /// Run an explicit memory-reclamation pass (between phases or runs)
    pub fn reclaim(&self) {
        reclaim_with(self.ops.as_ref());
    }
}

/// Run an explicit memory-reclamation pass against the running process
pub fn reclaim_memory() {
    reclaim_with(&SystemOps);
}

fn reclaim_with(ops: &dyn EnvironmentOps) {
    match ops.reclaim() {
        Ok(()) => debug!("Memory reclamation pass completed"),
        Err(e) => warn!("Memory reclamation pass failed: {}", e),
    }
}

/// Scoped low-noise mode; restores the environment when dropped
#[must_use = "dropping the guard immediately leaves low-noise mode"]
pub struct LowNoiseGuard<'a> {
    ops: &'a dyn EnvironmentOps,
    applied: Vec<AppliedStep>,
    warnings: Vec<EnvironmentWarning>,
}

impl<'a> LowNoiseGuard<'a> {
    fn warn(&mut self, warning: EnvironmentWarning) {
        warn!("{} (continuing)", warning);
        self.warnings.push(warning);
    }

    /// Warnings raised while entering (or leaving) low-noise mode
    pub fn warnings(&self) -> &[EnvironmentWarning] {
        &self.warnings
    }

    /// Number of steps currently in effect
    pub fn active_steps(&self) -> usize {
        self.applied.len()
    }

    /// Leave low-noise mode now, returning any restoration warnings
    pub fn restore(mut self) -> Vec<EnvironmentWarning> {
        let before = self.warnings.len();
        self.undo();
        self.warnings.split_off(before)
    }

    fn undo(&mut self) {
        while let Some(step) = self.applied.pop() {
            let (name, result) = match &step {
                AppliedStep::Priority(previous) => ("priority", self.ops.set_priority(*previous)),
                AppliedStep::Affinity(Some(previous)) => {
                    ("affinity", self.ops.set_affinity(previous))
                }
                AppliedStep::Affinity(None) => {
                    debug!("Previous affinity unknown; leaving process pinned");
                    continue;
                }
                AppliedStep::Reclamation => ("memory reclamation", self.ops.resume_reclamation()),
            };
            match result {
                Ok(()) => debug!("Restored {}", name),
                Err(e) => self.warn(EnvironmentWarning::Restore {
                    step: name,
                    reason: e.to_string(),
                }),
            }
        }
    }
}

impl Drop for LowNoiseGuard<'_> {
    fn drop(&mut self) {
        self.undo();
    }
}
