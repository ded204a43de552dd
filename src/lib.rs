//! # Transport Benchmark Library
//!
//! A low-noise measurement harness for comparing the request latency and
//! throughput of HTTP transports (HTTP/1.1, HTTP/2 and HTTP/3) against a
//! single target.
//!
//! ## Measurement Model
//!
//! Each run opens one transport handle and drives it through a fixed
//! sequence of phases:
//!
//! - **Warm-up**: a configurable number of trials whose results are discarded,
//!   so connection setup, TLS handshakes and cold caches never reach the data.
//! - **Measurement**: strictly sequential trials, each timed with a monotonic
//!   clock and bounded by a per-trial timeout that covers the full body drain.
//! - **Reduction**: the collected `SampleRecord`s are reduced to a `Summary`
//!   (median, nearest-rank percentiles, trimmed mean of the fastest samples,
//!   outliers, throughput and scheduling correlation).
//!
//! Before a run the process can enter "low-noise mode": allocator trimming is
//! suspended, the process is pinned to one logical core and its priority is
//! raised. Every step is best-effort and restored when the run ends.
//!
//! ## Architecture Overview
//!
//! - `environment`: low-noise mode and its scoped restore guard
//! - `transport`: the request-response abstraction and HTTP implementations
//! - `benchmark`: the trial runner state machine and per-transport orchestration
//! - `sample`: immutable per-trial records
//! - `probe`: optional context-switch sampling
//! - `metrics`: the statistics reducer
//! - `report`: human-readable rendering of summaries and comparisons
//! - `results`: result collection and JSON output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use transport_bench::{BenchmarkRunner, RunConfig, TransportKind};
//! use transport_bench::transport::{Target, TransportConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = TransportConfig::new(
//!         TransportKind::Http2,
//!         Target::new("https://127.0.0.1:8443/"),
//!     );
//!     let config = RunConfig::new(transport);
//!
//!     let results = BenchmarkRunner::new(config).run().await?;
//!     if let Some(latency) = &results.summary.latency {
//!         println!("Median latency: {:?}", latency.median);
//!     }
//!     Ok(())
//! }
//! ```

/// Trial runner and per-transport orchestration
///
/// Contains `TrialRunner`, which walks a transport through the
/// Idle → WarmingUp → Measuring → Completed phases, and `BenchmarkRunner`,
/// which opens the transport and reduces the collected records.
pub mod benchmark;

/// Command-line interface and configuration
pub mod cli;

/// Low-noise mode: allocator trimming, core pinning and priority
pub mod environment;

pub mod logging;

/// Statistics reducer
///
/// Turns a sequence of `SampleRecord`s into a `Summary`. All functions are
/// pure and deterministic for a given input.
pub mod metrics;

/// Context-switch sampling around trials
pub mod probe;

/// Human-readable report rendering
pub mod report;

/// Result collection, comparison and JSON output
pub mod results;

pub mod sample;

/// Transport abstraction and HTTP implementations
pub mod transport;

pub mod utils;

pub use benchmark::{BenchmarkRunner, RunConfig, RunPhase, TrialRunner};
pub use cli::{Args, TransportKind};
pub use environment::{EnvironmentController, EnvironmentSettings, LowNoiseGuard};
pub use metrics::{LatencyStats, Reducer, Summary, ThroughputStats};
pub use results::{ResultsManager, RunResults};
pub use sample::{FailureKind, SampleRecord};
pub use transport::{Transport, TransportError};

/// The current version of the transport benchmark
///
/// Recorded in JSON output alongside system information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default request target
    ///
    /// A local TLS test server; override with `--target`.
    pub const TARGET: &str = "https://127.0.0.1:8443/";

    /// Default number of measured trials per transport
    pub const TRIALS: usize = 100;

    /// Default number of discarded warm-up trials
    ///
    /// Enough to get past connection setup, TLS session establishment and
    /// allocator growth before any sample is kept.
    pub const WARMUP_TRIALS: usize = 20;

    /// Default per-trial timeout, covering the request and the full body drain
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Percentiles reported by default
    pub const PERCENTILES: [f64; 4] = [50.0, 90.0, 95.0, 99.0];

    /// Share of the fastest samples averaged into the trimmed mean
    pub const TRIM_PERCENT: u32 = 20;

    /// Samples above this multiple of the mean are outliers
    pub const OUTLIER_FACTOR: f64 = 3.0;

    /// Requested nice value; -20 is the highest priority on unix
    pub const PRIORITY: i32 = -20;

    /// Settling pause between consecutive transport runs
    pub const PAUSE_BETWEEN_RUNS: Duration = Duration::from_secs(1);

    /// Number of individual trials printed per transport
    pub const SHOW_TRIALS: usize = 10;
}
