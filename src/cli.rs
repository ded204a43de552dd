use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transport Benchmark - low-noise latency and throughput comparison of HTTP transports
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Transports to benchmark, run in the given order (space-separated: http1, http2, http3)
    #[clap(short = 't', long = "transport", value_enum, default_values_t = vec![TransportKind::Http2], num_args = 1.., env = "TRANSPORT_BENCH_TRANSPORTS", value_delimiter = ',', help_heading = "Core Options")]
    pub transports: Vec<TransportKind>,

    /// Benchmark every available transport (overrides --transport)
    #[clap(long, default_value_t = false, help_heading = "Core Options")]
    pub all: bool,

    /// Request target URL
    #[clap(long, default_value = crate::defaults::TARGET, env = "TRANSPORT_BENCH_TARGET", help_heading = "Core Options")]
    pub target: String,

    /// Number of measured trials per transport
    #[clap(short = 'i', long, default_value_t = crate::defaults::TRIALS, env = "TRANSPORT_BENCH_TRIALS", help_heading = "Core Options")]
    pub trials: usize,

    /// Number of discarded warm-up trials per transport
    #[clap(short = 'w', long = "warmup", default_value_t = crate::defaults::WARMUP_TRIALS, env = "TRANSPORT_BENCH_WARMUP", help_heading = "Core Options")]
    pub warmup_trials: usize,

    /// Per-trial timeout covering the full exchange including body drain (e.g. 500ms, 10s)
    #[clap(long, default_value = "30s", value_parser = parse_duration, env = "TRANSPORT_BENCH_TIMEOUT", help_heading = "Core Options")]
    pub timeout: Duration,

    /// Accept invalid (e.g. self-signed) TLS certificates
    #[clap(long, default_value_t = false, env = "TRANSPORT_BENCH_INSECURE", help_heading = "Core Options")]
    pub insecure: bool,

    /// Percentiles to report
    #[clap(long, num_args = 1.., default_values_t = crate::defaults::PERCENTILES.to_vec(), help_heading = "Statistics")]
    pub percentiles: Vec<f64>,

    /// Share of the fastest samples averaged into the trimmed mean, in percent
    #[clap(long, default_value_t = crate::defaults::TRIM_PERCENT, help_heading = "Statistics")]
    pub trim_percent: u32,

    /// Samples slower than this multiple of the mean count as outliers
    #[clap(long, default_value_t = crate::defaults::OUTLIER_FACTOR, help_heading = "Statistics")]
    pub outlier_factor: f64,

    /// Disable context-switch sampling around each trial
    #[clap(long, default_value_t = false, help_heading = "Environment")]
    pub no_scheduler_probe: bool,

    /// Do not enter low-noise mode (allocator trim, core pinning, priority)
    #[clap(long, default_value_t = false, env = "TRANSPORT_BENCH_NO_LOW_NOISE", help_heading = "Environment")]
    pub no_low_noise: bool,

    /// Logical core to pin the process to (defaults to the first available core)
    #[clap(long, help_heading = "Environment")]
    pub cpu_core: Option<usize>,

    /// Nice value requested for the process (-20 is the highest priority)
    #[clap(long, default_value_t = crate::defaults::PRIORITY, allow_hyphen_values = true, help_heading = "Environment")]
    pub priority: i32,

    /// Pause between transports to let the previous run settle
    #[clap(long, default_value = "1s", value_parser = parse_duration, help_heading = "Environment")]
    pub pause: Duration,

    /// Number of individual trials to print per transport
    #[clap(long, default_value_t = crate::defaults::SHOW_TRIALS, help_heading = "Output")]
    pub show_trials: usize,

    /// Write all results as JSON to this file
    #[clap(short = 'o', long, env = "TRANSPORT_BENCH_OUTPUT", help_heading = "Output")]
    pub output_file: Option<PathBuf>,

    /// Continue with the next transport if one cannot be opened
    #[clap(long, default_value_t = false, help_heading = "Output")]
    pub continue_on_error: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = ArgAction::Count, help_heading = "Output")]
    pub verbose: u8,

    /// Only print warnings, errors and the final report
    #[clap(short = 'q', long, default_value_t = false, help_heading = "Output")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            transports: vec![TransportKind::Http2],
            all: false,
            target: crate::defaults::TARGET.to_string(),
            trials: crate::defaults::TRIALS,
            warmup_trials: crate::defaults::WARMUP_TRIALS,
            timeout: crate::defaults::TIMEOUT,
            insecure: false,
            percentiles: crate::defaults::PERCENTILES.to_vec(),
            trim_percent: crate::defaults::TRIM_PERCENT,
            outlier_factor: crate::defaults::OUTLIER_FACTOR,
            no_scheduler_probe: false,
            no_low_noise: false,
            cpu_core: None,
            priority: crate::defaults::PRIORITY,
            pause: crate::defaults::PAUSE_BETWEEN_RUNS,
            show_trials: crate::defaults::SHOW_TRIALS,
            output_file: None,
            continue_on_error: false,
            verbose: 0,
            quiet: false,
            log_file: None,
        }
    }
}

impl Args {
    /// Transports to run, in order, with `--all` expanded and duplicates removed
    pub fn selected_transports(&self) -> Vec<TransportKind> {
        if self.all {
            return TransportKind::all().to_vec();
        }
        let mut selected = Vec::with_capacity(self.transports.len());
        for kind in &self.transports {
            if !selected.contains(kind) {
                selected.push(*kind);
            }
        }
        selected
    }
}

/// Protocol a transport handle speaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
pub enum TransportKind {
    /// HTTP/1.1 over TCP (TLS when the target is https)
    #[clap(name = "http1")]
    Http1,

    /// HTTP/2 with prior knowledge
    #[clap(name = "http2")]
    Http2,

    /// HTTP/3 over QUIC
    #[clap(name = "http3")]
    Http3,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http1 => write!(f, "HTTP/1.1"),
            TransportKind::Http2 => write!(f, "HTTP/2"),
            TransportKind::Http3 => write!(f, "HTTP/3"),
        }
    }
}

impl TransportKind {
    pub fn all() -> &'static [TransportKind] {
        &[
            TransportKind::Http1,
            TransportKind::Http2,
            TransportKind::Http3,
        ]
    }

    /// Short lowercase name, matching the command-line spelling
    pub fn short_name(&self) -> &'static str {
        match self {
            TransportKind::Http1 => "http1",
            TransportKind::Http2 => "http2",
            TransportKind::Http3 => "http3",
        }
    }
}

/// Parse duration from string (e.g., "500ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let seconds = match unit {
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))
}
