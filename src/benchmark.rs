//! # Benchmark Engine Module
//!
//! This module contains the trial runner and the per-transport orchestration
//! around it.
//!
//! ## Key Components
//!
//! - **RunConfig**: Validated parameters for one transport run
//! - **TrialRunner**: Drives one open transport through warm-up and measurement
//! - **BenchmarkRunner**: Opens the transport, runs the trials, closes the
//!   transport and reduces the records into `RunResults`
//!
//! ## Run Lifecycle
//!
//! 1. **Idle**: Transport opened; nothing attempted yet
//! 2. **WarmingUp**: Warm-up trials run through the exact trial procedure and
//!    are discarded
//! 3. **Measuring**: Measured trials run strictly one after another and every
//!    outcome (success or failure) is appended in trial order
//! 4. **Completed**: Transport closed; records handed to the reducer
//!
//! A failed trial never stops the run. The only fatal condition is failing to
//! open the transport, which happens before any trial.

use crate::{
    cli::{Args, TransportKind},
    metrics::{ReductionParams, Reducer},
    probe::{self, SchedulingProbe},
    results::RunResults,
    sample::{SampleRecord, TrialFailure},
    transport::{
        Target, TlsPolicy, Transport, TransportConfig, TransportError, TransportFactory,
        TransportState,
    },
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// A helper struct to provide a consistent, single source of truth for displaying
/// the per-transport run configuration.
struct RunConfigDisplay<'a> {
    config: &'a RunConfig,
}

impl<'a> std::fmt::Display for RunConfigDisplay<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config;
        writeln!(
            f,
            "-----------------------------------------------------------------"
        )?;
        writeln!(f, "Starting Benchmark for: {}", config.transport.kind)?;
        writeln!(f, "  Target:             {}", config.transport.target)?;
        writeln!(f, "  Warm-up Trials:     {}", config.warmup_trials)?;
        writeln!(f, "  Measured Trials:    {}", config.trials)?;
        writeln!(f, "  Trial Timeout:      {:?}", config.timeout)?;
        let tls = match config.transport.tls {
            TlsPolicy::Verify => "Verify certificates",
            TlsPolicy::AcceptInvalid => "Accept invalid certificates",
        };
        writeln!(f, "  TLS:                {}", tls)?;
        writeln!(
            f,
            "  Scheduler Probe:    {}",
            if config.probe_scheduling {
                "Enabled"
            } else {
                "Disabled"
            }
        )?;
        write!(
            f,
            "-----------------------------------------------------------------"
        )
    }
}

/// Configuration for one transport run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Transport kind, target and TLS policy
    pub transport: TransportConfig,

    /// Trials executed and discarded before measurement (may be 0)
    pub warmup_trials: usize,

    /// Measured trials (at least 1)
    pub trials: usize,

    /// Upper bound for one trial, including the full body drain
    pub timeout: Duration,

    pub reduction: ReductionParams,

    /// Sample context switches around each trial when a probe is available
    pub probe_scheduling: bool,

    /// Run a memory-reclamation pass between warm-up and measurement
    pub reclaim_after_warmup: bool,

    /// Number of trial records shown in the report
    pub show_trials: usize,
}

impl RunConfig {
    /// Configuration with default counts, timeout and reduction parameters
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            warmup_trials: crate::defaults::WARMUP_TRIALS,
            trials: crate::defaults::TRIALS,
            timeout: crate::defaults::TIMEOUT,
            reduction: ReductionParams::default(),
            probe_scheduling: true,
            reclaim_after_warmup: true,
            show_trials: crate::defaults::SHOW_TRIALS,
        }
    }

    /// Build the configuration for one transport from CLI arguments
    ///
    /// The result is validated, so configuration mistakes surface before any
    /// transport is opened.
    pub fn from_args(args: &Args, kind: TransportKind) -> Result<Self> {
        let mut transport = TransportConfig::new(kind, Target::new(args.target.clone()));
        if args.insecure {
            transport.tls = TlsPolicy::AcceptInvalid;
        }
        // Connection setup counts against the trial, so it shares the bound.
        transport.connect_timeout = Some(args.timeout);

        let config = Self {
            transport,
            warmup_trials: args.warmup_trials,
            trials: args.trials,
            timeout: args.timeout,
            reduction: ReductionParams {
                percentiles: args.percentiles.clone(),
                trim_percent: args.trim_percent,
                outlier_factor: args.outlier_factor,
            },
            probe_scheduling: !args.no_scheduler_probe,
            reclaim_after_warmup: !args.no_low_noise,
            show_trials: args.show_trials,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trials == 0 {
            anyhow::bail!("Trial count must be at least 1");
        }
        if self.timeout.is_zero() {
            anyhow::bail!("Trial timeout must be greater than zero");
        }
        for &p in &self.reduction.percentiles {
            if !(0.0..=100.0).contains(&p) {
                anyhow::bail!("Percentile {} is outside [0, 100]", p);
            }
        }
        if self.reduction.trim_percent == 0 || self.reduction.trim_percent > 100 {
            anyhow::bail!(
                "Trim percent must be in (0, 100], got {}",
                self.reduction.trim_percent
            );
        }
        if !self.reduction.outlier_factor.is_finite() || self.reduction.outlier_factor <= 0.0 {
            anyhow::bail!(
                "Outlier factor must be a positive number, got {}",
                self.reduction.outlier_factor
            );
        }
        Ok(())
    }
}

/// Phase of a trial runner; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    WarmingUp,
    Measuring,
    Completed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "Idle"),
            RunPhase::WarmingUp => write!(f, "WarmingUp"),
            RunPhase::Measuring => write!(f, "Measuring"),
            RunPhase::Completed => write!(f, "Completed"),
        }
    }
}

/// Executes warm-up and measured trials against one open transport
///
/// The runner owns the transport handle for the whole run and closes it
/// exactly once, after the last measured trial.
pub struct TrialRunner {
    config: RunConfig,
    transport: Option<Box<dyn Transport>>,
    probe: Option<Box<dyn SchedulingProbe>>,
    phase: RunPhase,
    records: Vec<SampleRecord>,
}

impl TrialRunner {
    pub fn new(config: RunConfig, transport: Box<dyn Transport>) -> Self {
        let records = Vec::with_capacity(config.trials);
        Self {
            config,
            transport: Some(transport),
            probe: None,
            phase: RunPhase::Idle,
            records,
        }
    }

    /// Attach a scheduling probe; `None` leaves trials unprobed
    pub fn with_probe(mut self, probe: Option<Box<dyn SchedulingProbe>>) -> Self {
        self.probe = probe;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Measured records collected so far, in trial order
    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(next > self.phase, "{} -> {}", self.phase, next);
        debug!("Phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    /// Run warm-up, then measurement, then close the transport
    ///
    /// Fails only when called on a runner that already ran, or when the
    /// transport it was given is already closed.
    pub async fn run(&mut self) -> Result<&[SampleRecord]> {
        if self.phase != RunPhase::Idle {
            anyhow::bail!("Trial runner already ran (phase {})", self.phase);
        }
        let mut transport = self
            .transport
            .take()
            .context("Trial runner has no transport")?;
        if transport.state() != TransportState::Open {
            anyhow::bail!("{} transport is already closed", transport.kind());
        }

        let run_start = Instant::now();

        self.advance(RunPhase::WarmingUp);
        if self.config.warmup_trials > 0 {
            info!(
                "Running warmup with {} trials",
                self.config.warmup_trials
            );
        }
        for index in 0..self.config.warmup_trials {
            let record = self.run_trial(transport.as_mut(), index, run_start).await;
            if let Some(failure) = record.failure_reason() {
                debug!("Warm-up trial {} failed: {}", index, failure.message);
            }
        }

        if self.config.reclaim_after_warmup {
            crate::environment::reclaim_memory();
        }

        self.advance(RunPhase::Measuring);
        info!("Running {} measured trials", self.config.trials);
        for index in 0..self.config.trials {
            let record = self.run_trial(transport.as_mut(), index, run_start).await;
            match record.failure_reason() {
                None => debug!(
                    "Trial {}: {:?}, {} bytes",
                    index,
                    record.elapsed(),
                    record.bytes()
                ),
                Some(failure) => warn!(
                    "Trial {} failed with {}: {}",
                    index, failure.kind, failure.message
                ),
            }
            self.records.push(record);
        }

        if let Err(e) = transport.close().await {
            warn!("Failed to close {} transport: {:#}", transport.kind(), e);
        }
        drop(transport);

        self.advance(RunPhase::Completed);
        Ok(&self.records)
    }

    /// Execute one trial and build its record
    async fn run_trial(
        &self,
        transport: &mut dyn Transport,
        index: usize,
        run_start: Instant,
    ) -> SampleRecord {
        let before = self.snapshot();

        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let timeout = self.config.timeout;
        let outcome = tokio::time::timeout(
            timeout,
            transport.request(&self.config.transport.target, timeout),
        )
        .await;
        let elapsed = start.elapsed();
        let offset = start.duration_since(run_start);

        let record = match outcome {
            Ok(Ok(exchange)) => SampleRecord::success(
                index,
                started_at,
                offset,
                elapsed,
                exchange.bytes_read,
                exchange.protocol_label,
            ),
            Ok(Err(e)) => {
                SampleRecord::failure(index, started_at, offset, elapsed, TrialFailure::from(&e))
            }
            Err(_) => SampleRecord::failure(
                index,
                started_at,
                offset,
                elapsed,
                TrialFailure::from(&TransportError::Timeout(timeout)),
            ),
        };

        match (before, self.snapshot()) {
            (Some(before), Some(after)) => record.with_context_switches(before.delta_to(&after)),
            _ => record,
        }
    }

    fn snapshot(&self) -> Option<crate::probe::ContextSwitches> {
        let probe = self.probe.as_ref()?;
        match probe.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                debug!("Scheduling probe '{}' failed: {}", probe.name(), e);
                None
            }
        }
    }
}

/// Benchmark runner for one transport
///
/// Opens the transport, runs the trials under a tracing span named after the
/// transport, and reduces the records into `RunResults`.
pub struct BenchmarkRunner {
    config: RunConfig,
}

impl BenchmarkRunner {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Open the configured transport and run the benchmark
    ///
    /// Opening the transport is the only step that can fail the run.
    pub async fn run(&self) -> Result<RunResults> {
        self.config.validate()?;
        let kind = self.config.transport.kind;
        async {
            let transport = TransportFactory::open(&self.config.transport).with_context(|| {
                format!(
                    "Failed to open {} transport to {}",
                    kind, self.config.transport.target
                )
            })?;
            let probe = if self.config.probe_scheduling {
                probe::detect()
            } else {
                None
            };
            self.execute(transport, probe).await
        }
        .instrument(run_span(kind))
        .await
    }

    /// Run the benchmark over an already opened transport
    pub async fn run_with(
        &self,
        transport: Box<dyn Transport>,
        probe: Option<Box<dyn SchedulingProbe>>,
    ) -> Result<RunResults> {
        self.config.validate()?;
        self.execute(transport, probe)
            .instrument(run_span(self.config.transport.kind))
            .await
    }

    async fn execute(
        &self,
        transport: Box<dyn Transport>,
        probe: Option<Box<dyn SchedulingProbe>>,
    ) -> Result<RunResults> {
        let banner = RunConfigDisplay {
            config: &self.config,
        };
        info!("{}", banner);

        let timestamp = chrono::Utc::now();
        let wall_start = Instant::now();

        let mut runner = TrialRunner::new(self.config.clone(), transport).with_probe(probe);
        runner.run().await?;
        let records = runner.into_records();

        let summary = Reducer::new(self.config.reduction.clone()).reduce(&records);
        info!(
            "Benchmark completed for {}: {}/{} trials succeeded",
            self.config.transport.kind, summary.success_count, summary.total_trials
        );

        Ok(RunResults::new(
            self.config.clone(),
            records,
            summary,
            timestamp,
            wall_start.elapsed(),
        ))
    }
}

/// Span named after the transport so log lines carry e.g. `[http2]`
fn run_span(kind: TransportKind) -> tracing::Span {
    match kind {
        TransportKind::Http1 => info_span!("http1"),
        TransportKind::Http2 => info_span!("http2"),
        TransportKind::Http3 => info_span!("http3"),
    }
}
