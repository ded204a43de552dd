//! # Statistics Reducer
//!
//! Reduces the ordered sequence of `SampleRecord`s from one run into a
//! `Summary`. The reducer is a pure function over borrowed records: it sorts a
//! private copy of the successful durations and never touches the input, so
//! repeated reductions of the same records are identical.
//!
//! ## Algorithms
//!
//! - **Median**: mean of the two central values for even counts
//! - **Percentiles**: nearest rank, index = floor(count × p / 100), clamped
//! - **Trimmed mean**: mean of the fastest `max(1, floor(count × trim% / 100))`
//! - **Outliers**: durations above `outlier_factor × mean`
//! - **Scheduling correlation**: trials with at least one involuntary
//!   context switch, as a count and a share of all trials
//! - **Throughput**: successful bytes over successful elapsed time
//!
//! With zero successful records every duration-derived field is absent rather
//! than computed.

use crate::sample::{FailureKind, SampleRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Tunable reduction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReductionParams {
    /// Percentiles to report, in the order given
    pub percentiles: Vec<f64>,
    /// Share of the fastest samples averaged by the trimmed mean
    pub trim_percent: u32,
    /// Multiple of the mean above which a sample is an outlier
    pub outlier_factor: f64,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            percentiles: crate::defaults::PERCENTILES.to_vec(),
            trim_percent: crate::defaults::TRIM_PERCENT,
            outlier_factor: crate::defaults::OUTLIER_FACTOR,
        }
    }
}

/// Percentile value pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: Duration,
}

/// Latency statistics over successful trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: Duration,
    pub median: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Population standard deviation
    pub std_dev: Duration,
    /// Standard deviation relative to the mean
    pub coefficient_of_variation: f64,
    pub percentiles: Vec<PercentileValue>,
    /// Mean of the fastest `trim_percent` of samples
    pub trimmed_mean: Duration,
    pub trimmed_count: usize,
    pub outlier_count: usize,
    pub outlier_threshold: Duration,
}

impl LatencyStats {
    /// Look up a reported percentile
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        self.percentiles
            .iter()
            .find(|v| (v.percentile - p).abs() < f64::EPSILON)
            .map(|v| v.value)
    }
}

/// Throughput over successful trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub bytes_per_second: f64,
    /// Sum of elapsed time across successful trials
    pub busy_time: Duration,
}

/// Co-occurrence of scheduler preemption with measured trials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingStats {
    /// Trials that carried a context-switch delta
    pub probed_trials: usize,
    /// Trials with an involuntary context-switch delta above zero
    pub preempted_trials: usize,
    /// `preempted_trials` as a percentage of all trials
    pub preempted_percent: f64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
}

/// Failure counts per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBreakdown {
    pub connection: usize,
    pub timeout: usize,
    pub read: usize,
}

impl FailureBreakdown {
    fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Connection => self.connection += 1,
            FailureKind::Timeout => self.timeout += 1,
            FailureKind::Read => self.read += 1,
        }
    }

    pub fn get(&self, kind: FailureKind) -> usize {
        match kind {
            FailureKind::Connection => self.connection,
            FailureKind::Timeout => self.timeout,
            FailureKind::Read => self.read,
        }
    }
}

/// Reduced statistics over one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_trials: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub failures: FailureBreakdown,
    /// Bytes drained across successful trials
    pub total_bytes: u64,
    /// Absent when no trial succeeded
    pub latency: Option<LatencyStats>,
    /// Absent when no trial succeeded or the successful trials took no time
    pub throughput: Option<ThroughputStats>,
    /// Absent when no record carried a context-switch delta
    pub scheduling: Option<SchedulingStats>,
}

/// Error for callers that require duration data
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReduceError {
    #[error("no successful trials out of {failures} attempts")]
    InsufficientData { failures: usize },
}

impl Summary {
    /// Latency statistics, or `InsufficientData` when nothing succeeded
    pub fn require_latency(&self) -> Result<&LatencyStats, ReduceError> {
        self.latency.as_ref().ok_or(ReduceError::InsufficientData {
            failures: self.failure_count,
        })
    }

    /// Fraction of trials that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        if self.total_trials == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_trials as f64 * 100.0
    }
}

/// Reduces sample records into summaries
#[derive(Debug, Clone, Default)]
pub struct Reducer {
    params: ReductionParams,
}

impl Reducer {
    pub fn new(params: ReductionParams) -> Self {
        Self { params }
    }

    /// Compute the summary for a completed run
    pub fn reduce(&self, records: &[SampleRecord]) -> Summary {
        let mut failures = FailureBreakdown::default();
        let mut durations = Vec::with_capacity(records.len());
        let mut total_bytes = 0u64;

        for record in records {
            match record.failure_reason() {
                Some(failure) => failures.record(failure.kind),
                None => {
                    durations.push(record.elapsed());
                    total_bytes += record.bytes();
                }
            }
        }

        let success_count = durations.len();
        durations.sort_unstable();

        let latency = self.latency_stats(&durations);
        let throughput = throughput(&durations, total_bytes);

        Summary {
            total_trials: records.len(),
            success_count,
            failure_count: records.len() - success_count,
            failures,
            total_bytes,
            latency,
            throughput,
            scheduling: scheduling_stats(records),
        }
    }

    fn latency_stats(&self, sorted: &[Duration]) -> Option<LatencyStats> {
        let (&min, &max) = (sorted.first()?, sorted.last()?);

        let mean_value = mean(sorted)?;
        let mean_ns = mean_value.as_nanos() as f64;
        let std_dev_ns = {
            let variance = sorted
                .iter()
                .map(|d| (d.as_nanos() as f64 - mean_ns).powi(2))
                .sum::<f64>()
                / sorted.len() as f64;
            variance.sqrt()
        };
        let coefficient_of_variation = if mean_ns > 0.0 {
            std_dev_ns / mean_ns
        } else {
            0.0
        };

        let percentiles = self
            .params
            .percentiles
            .iter()
            .filter_map(|&p| {
                percentile(sorted, p).map(|value| PercentileValue {
                    percentile: p,
                    value,
                })
            })
            .collect();

        let trimmed_count = trimmed_count(sorted.len(), self.params.trim_percent);
        let trimmed_mean = mean(&sorted[..trimmed_count])?;

        let outlier_threshold = Duration::from_nanos((mean_ns * self.params.outlier_factor) as u64);
        let outlier_count = sorted.iter().filter(|&&d| d > outlier_threshold).count();

        Some(LatencyStats {
            mean: mean_value,
            median: median(sorted)?,
            min,
            max,
            std_dev: Duration::from_nanos(std_dev_ns as u64),
            coefficient_of_variation,
            percentiles,
            trimmed_mean,
            trimmed_count,
            outlier_count,
            outlier_threshold,
        })
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }
    let total: u128 = durations.iter().map(Duration::as_nanos).sum();
    let mean_ns = total / durations.len() as u128;
    Some(Duration::from_nanos(mean_ns as u64))
}

/// Median of ascending-sorted durations
pub fn median(sorted: &[Duration]) -> Option<Duration> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 0 {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2)
    } else {
        Some(sorted[n / 2])
    }
}

/// Nearest-rank percentile of ascending-sorted durations
pub fn percentile(sorted: &[Duration], p: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() as f64 * p / 100.0).floor().max(0.0) as usize;
    Some(sorted[rank.min(sorted.len() - 1)])
}

/// Number of fastest samples averaged by the trimmed mean
pub fn trimmed_count(count: usize, trim_percent: u32) -> usize {
    (count * trim_percent as usize / 100).max(1).min(count.max(1))
}

fn throughput(durations: &[Duration], total_bytes: u64) -> Option<ThroughputStats> {
    if durations.is_empty() {
        return None;
    }
    let busy_time: Duration = durations.iter().sum();
    if busy_time.is_zero() {
        return None;
    }
    Some(ThroughputStats {
        bytes_per_second: total_bytes as f64 / busy_time.as_secs_f64(),
        busy_time,
    })
}

fn scheduling_stats(records: &[SampleRecord]) -> Option<SchedulingStats> {
    let deltas: Vec<_> = records
        .iter()
        .filter_map(SampleRecord::context_switches)
        .collect();
    if deltas.is_empty() {
        return None;
    }

    let preempted_trials = deltas.iter().filter(|d| d.was_preempted()).count();
    Some(SchedulingStats {
        probed_trials: deltas.len(),
        preempted_trials,
        preempted_percent: preempted_trials as f64 / records.len() as f64 * 100.0,
        voluntary_switches: deltas.iter().map(|d| d.voluntary).sum(),
        involuntary_switches: deltas.iter().map(|d| d.involuntary).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ContextSwitches;
    use crate::sample::TrialFailure;

    fn ok(index: usize, millis: u64, bytes: u64) -> SampleRecord {
        SampleRecord::success(
            index,
            chrono::Utc::now(),
            Duration::ZERO,
            Duration::from_millis(millis),
            bytes,
            "HTTP/2",
        )
    }

    fn failed(index: usize, kind: FailureKind) -> SampleRecord {
        SampleRecord::failure(
            index,
            chrono::Utc::now(),
            Duration::ZERO,
            Duration::from_millis(7),
            TrialFailure {
                kind,
                message: "injected".to_string(),
            },
        )
    }

    fn records_ms(values: &[u64]) -> Vec<SampleRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, &ms)| ok(i, ms, 100))
            .collect()
    }

    #[test]
    fn test_reduction_is_deterministic() {
        let records = records_ms(&[12, 7, 30, 9, 15, 11, 8]);
        let reducer = Reducer::default();
        let first = reducer.reduce(&records);
        let second = reducer.reduce(&records);
        assert_eq!(first, second);
        // Input order is untouched.
        assert_eq!(records[0].elapsed(), Duration::from_millis(12));
    }

    #[test]
    fn test_median_even_and_odd() {
        let summary = Reducer::default().reduce(&records_ms(&[40, 10, 30, 20]));
        assert_eq!(summary.latency.unwrap().median, Duration::from_millis(25));

        let summary = Reducer::default().reduce(&records_ms(&[30, 10, 20]));
        assert_eq!(summary.latency.as_ref().unwrap().median, Duration::from_millis(20));
    }

    #[test]
    fn test_percentiles_use_nearest_rank() {
        let values: Vec<u64> = (1..=100).rev().collect();
        let summary = Reducer::default().reduce(&records_ms(&values));
        let latency = summary.latency.unwrap();

        assert_eq!(latency.percentile(90.0), Some(Duration::from_millis(91)));
        assert_eq!(latency.percentile(99.0), Some(Duration::from_millis(100)));
        assert_eq!(latency.percentile(50.0), Some(Duration::from_millis(51)));
        assert_eq!(latency.min, Duration::from_millis(1));
        assert_eq!(latency.max, Duration::from_millis(100));
    }

    #[test]
    fn test_percentile_index_is_clamped() {
        let sorted = vec![Duration::from_millis(1), Duration::from_millis(2)];
        assert_eq!(percentile(&sorted, 100.0), Some(Duration::from_millis(2)));
        assert_eq!(percentile(&sorted, 0.0), Some(Duration::from_millis(1)));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_trimmed_mean_below_median_below_mean() {
        let summary = Reducer::default().reduce(&records_ms(&[5, 6, 7, 8, 9, 10, 12, 15, 20, 40]));
        let latency = summary.latency.unwrap();

        assert_eq!(latency.trimmed_count, 2);
        assert_eq!(latency.trimmed_mean, Duration::from_micros(5_500));
        assert!(latency.trimmed_mean <= latency.median);
        assert!(latency.median <= latency.mean);
    }

    #[test]
    fn test_trimmed_count_takes_at_least_one() {
        assert_eq!(trimmed_count(1, 20), 1);
        assert_eq!(trimmed_count(4, 20), 1);
        assert_eq!(trimmed_count(5, 20), 1);
        assert_eq!(trimmed_count(10, 20), 2);
        assert_eq!(trimmed_count(100, 20), 20);
        assert_eq!(trimmed_count(10, 100), 10);
    }

    #[test]
    fn test_outlier_threshold_is_three_times_mean() {
        let summary = Reducer::default().reduce(&records_ms(&[10, 10, 10, 10, 100]));
        let latency = summary.latency.unwrap();

        assert_eq!(latency.mean, Duration::from_millis(28));
        assert_eq!(latency.outlier_threshold, Duration::from_millis(84));
        assert_eq!(latency.outlier_count, 1);
    }

    #[test]
    fn test_outlier_factor_is_configurable() {
        let reducer = Reducer::new(ReductionParams {
            outlier_factor: 4.0,
            ..Default::default()
        });
        let summary = reducer.reduce(&records_ms(&[10, 10, 10, 10, 100]));
        assert_eq!(summary.latency.unwrap().outlier_count, 0);
    }

    #[test]
    fn test_all_failed_run_has_no_duration_fields() {
        let records: Vec<_> = (0..5).map(|i| failed(i, FailureKind::Connection)).collect();
        let summary = Reducer::default().reduce(&records);

        assert_eq!(summary.success_count, 0);
        assert_eq!(summary.failure_count, 5);
        assert_eq!(summary.failures.connection, 5);
        assert!(summary.latency.is_none());
        assert!(summary.throughput.is_none());
        assert_eq!(summary.total_bytes, 0);
        assert_eq!(
            summary.require_latency(),
            Err(ReduceError::InsufficientData { failures: 5 })
        );
        assert_eq!(summary.success_rate(), 0.0);
    }

    #[test]
    fn test_empty_input_does_not_panic() {
        let summary = Reducer::default().reduce(&[]);
        assert_eq!(summary.total_trials, 0);
        assert!(summary.latency.is_none());
        assert!(summary.scheduling.is_none());
    }

    #[test]
    fn test_failures_are_excluded_from_latency_but_counted() {
        let mut records = records_ms(&[10, 20, 30]);
        records.push(failed(3, FailureKind::Timeout));
        records.push(failed(4, FailureKind::Read));

        let summary = Reducer::default().reduce(&records);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 2);
        assert_eq!(summary.failures.get(FailureKind::Timeout), 1);
        assert_eq!(summary.failures.get(FailureKind::Read), 1);
        assert_eq!(summary.latency.as_ref().unwrap().median, Duration::from_millis(20));
        assert_eq!(summary.total_bytes, 300);
        assert!((summary.success_rate() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_over_successful_trials() {
        let records: Vec<_> = (0..10).map(|i| ok(i, 5, 1024)).collect();
        let summary = Reducer::default().reduce(&records);
        let throughput = summary.throughput.unwrap();

        assert_eq!(throughput.busy_time, Duration::from_millis(50));
        assert!((throughput.bytes_per_second - 204_800.0).abs() < 1e-6);
    }

    #[test]
    fn test_throughput_absent_for_zero_duration() {
        let records = vec![ok(0, 0, 512), ok(1, 0, 512)];
        let summary = Reducer::default().reduce(&records);
        assert!(summary.throughput.is_none());
        assert!(summary.latency.is_some());
        assert_eq!(summary.total_bytes, 1024);
    }

    #[test]
    fn test_std_dev_and_coefficient_of_variation() {
        let summary = Reducer::default().reduce(&records_ms(&[2, 4, 4, 4, 5, 5, 7, 9]));
        let latency = summary.latency.unwrap();
        assert_eq!(latency.mean, Duration::from_millis(5));
        assert_eq!(latency.std_dev, Duration::from_millis(2));
        assert!((latency.coefficient_of_variation - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_scheduling_stats_only_with_probe_data() {
        let plain = Reducer::default().reduce(&records_ms(&[1, 2, 3]));
        assert!(plain.scheduling.is_none());

        let records: Vec<_> = (0..4)
            .map(|i| {
                ok(i, 5, 10).with_context_switches(ContextSwitches {
                    voluntary: 3,
                    involuntary: if i % 2 == 0 { 1 } else { 0 },
                })
            })
            .collect();
        let scheduling = Reducer::default().reduce(&records).scheduling.unwrap();

        assert_eq!(scheduling.probed_trials, 4);
        assert_eq!(scheduling.preempted_trials, 2);
        assert!((scheduling.preempted_percent - 50.0).abs() < 1e-9);
        assert_eq!(scheduling.voluntary_switches, 12);
        assert_eq!(scheduling.involuntary_switches, 2);
    }
}
