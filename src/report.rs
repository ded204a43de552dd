//! # Report Emitter
//!
//! Plain-text rendering of run results for the console. Every renderer is a
//! `Display` wrapper over shared references, so rendering never changes the
//! data it shows.

use crate::{
    metrics::Summary,
    results::{ComparisonRow, RunResults},
    sample::SampleRecord,
    utils::{
        format_bytes, format_delta_percent, format_duration, format_optional_duration,
        format_rate, table_row, table_separator,
    },
};
use colored::*;
use std::fmt;

const RULE: &str = "-----------------------------------------------------------------";

/// Summary plus the first N trial records of one run
pub struct RunReport<'a> {
    results: &'a RunResults,
    show_trials: usize,
}

impl<'a> RunReport<'a> {
    pub fn new(results: &'a RunResults) -> Self {
        Self {
            results,
            show_trials: results.config.show_trials,
        }
    }

    pub fn show_trials(mut self, n: usize) -> Self {
        self.show_trials = n;
        self
    }
}

impl fmt::Display for RunReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let results = self.results;
        writeln!(f, "{}", RULE)?;
        writeln!(
            f,
            "{}",
            format!("Results for {} ({})", results.transport, results.target).bold()
        )?;
        if let Some(protocol) = &results.protocol {
            writeln!(f, "  Negotiated Protocol: {}", protocol)?;
        }
        writeln!(f, "{}", RULE)?;
        write!(f, "{}", SummaryBlock(&results.summary))?;

        let shown = results.first_records(self.show_trials);
        if !shown.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "First {} of {} trials:",
                shown.len(),
                results.records.len()
            )?;
            write!(f, "{}", TrialTable(shown))?;
        }
        write!(f, "{}", RULE)
    }
}

/// Counts, latency, throughput and scheduling sections of a `Summary`
pub struct SummaryBlock<'a>(pub &'a Summary);

impl fmt::Display for SummaryBlock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;
        writeln!(
            f,
            "  Trials:              {} total, {} succeeded, {} failed ({:.1}% success)",
            summary.total_trials,
            summary.success_count,
            summary.failure_count,
            summary.success_rate()
        )?;
        if summary.failure_count > 0 {
            writeln!(
                f,
                "  Failures:            {}",
                format!(
                    "{} connection, {} timeout, {} read",
                    summary.failures.connection, summary.failures.timeout, summary.failures.read
                )
                .red()
            )?;
        }

        writeln!(f, "  Latency:")?;
        match &summary.latency {
            Some(latency) => {
                writeln!(f, "    Mean:              {}", format_duration(latency.mean))?;
                writeln!(f, "    Median:            {}", format_duration(latency.median))?;
                writeln!(f, "    Min:               {}", format_duration(latency.min))?;
                writeln!(f, "    Max:               {}", format_duration(latency.max))?;
                writeln!(
                    f,
                    "    Std Dev:           {} (CV {:.3})",
                    format_duration(latency.std_dev),
                    latency.coefficient_of_variation
                )?;
                for p in &latency.percentiles {
                    let label = format!("P{}:", p.percentile);
                    writeln!(f, "    {:<19}{}", label, format_duration(p.value))?;
                }
                writeln!(
                    f,
                    "    Trimmed Mean:      {} (fastest {} samples)",
                    format_duration(latency.trimmed_mean),
                    latency.trimmed_count
                )?;
                writeln!(
                    f,
                    "    Outliers:          {} above {}",
                    latency.outlier_count,
                    format_duration(latency.outlier_threshold)
                )?;
            }
            None => writeln!(f, "    {}", "no successful trials".yellow())?,
        }

        writeln!(f, "  Bytes Transferred:   {}", format_bytes(summary.total_bytes))?;
        match &summary.throughput {
            Some(throughput) => writeln!(
                f,
                "  Throughput:          {}",
                format_rate(throughput.bytes_per_second)
            )?,
            None => writeln!(f, "  Throughput:          N/A")?,
        }

        if let Some(scheduling) = &summary.scheduling {
            writeln!(
                f,
                "  Preempted Trials:    {} of {} probed ({:.1}% of all trials)",
                scheduling.preempted_trials, scheduling.probed_trials, scheduling.preempted_percent
            )?;
            writeln!(
                f,
                "  Context Switches:    {} voluntary, {} involuntary",
                scheduling.voluntary_switches, scheduling.involuntary_switches
            )?;
        }
        Ok(())
    }
}

/// Per-trial table
pub struct TrialTable<'a>(pub &'a [SampleRecord]);

const TRIAL_WIDTHS: [usize; 6] = [5, 12, 12, 10, 10, 40];

impl fmt::Display for TrialTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", table_separator(&TRIAL_WIDTHS))?;
        writeln!(
            f,
            "{}",
            table_row(
                &["#", "Offset", "Elapsed", "Bytes", "Switches", "Outcome"],
                &TRIAL_WIDTHS
            )
        )?;
        writeln!(f, "{}", table_separator(&TRIAL_WIDTHS))?;
        for record in self.0 {
            let switches = record
                .context_switches()
                .map(|d| format!("{}/{}", d.voluntary, d.involuntary))
                .unwrap_or_else(|| "-".to_string());
            let outcome = match record.failure_reason() {
                None => record.protocol().unwrap_or("ok").to_string(),
                Some(failure) => format!("{}: {}", failure.kind, failure.message),
            };
            let outcome = truncate(&outcome, TRIAL_WIDTHS[5]);
            let index = record.index().to_string();
            let offset = format_duration(record.offset());
            let elapsed = format_duration(record.elapsed());
            let bytes = record.bytes().to_string();
            writeln!(
                f,
                "{}",
                table_row(
                    &[
                        index.as_str(),
                        offset.as_str(),
                        elapsed.as_str(),
                        bytes.as_str(),
                        switches.as_str(),
                        outcome.as_str(),
                    ],
                    &TRIAL_WIDTHS
                )
            )?;
        }
        writeln!(f, "{}", table_separator(&TRIAL_WIDTHS))
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Cross-transport comparison; the first row is the baseline
pub struct ComparisonTable<'a>(pub &'a [ComparisonRow]);

const COMPARISON_WIDTHS: [usize; 7] = [10, 12, 12, 12, 14, 8, 10];

impl fmt::Display for ComparisonTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Transport Comparison".bold())?;
        writeln!(f, "{}", table_separator(&COMPARISON_WIDTHS))?;
        writeln!(
            f,
            "{}",
            table_row(
                &[
                    "Transport",
                    "Median",
                    "P99",
                    "Trimmed",
                    "Throughput",
                    "Success",
                    "vs Base",
                ],
                &COMPARISON_WIDTHS
            )
        )?;
        writeln!(f, "{}", table_separator(&COMPARISON_WIDTHS))?;
        for row in self.0 {
            let delta = if row.is_baseline {
                "baseline".to_string()
            } else {
                row.median_delta_percent
                    .map_or_else(|| "N/A".to_string(), format_delta_percent)
            };
            let transport = row.transport.to_string();
            let median = format_optional_duration(row.median);
            let p99 = format_optional_duration(row.p99);
            let trimmed = format_optional_duration(row.trimmed_mean);
            let throughput = row
                .bytes_per_second
                .map_or_else(|| "N/A".to_string(), format_rate);
            let success = format!("{:.1}%", row.success_rate);
            writeln!(
                f,
                "{}",
                table_row(
                    &[
                        transport.as_str(),
                        median.as_str(),
                        p99.as_str(),
                        trimmed.as_str(),
                        throughput.as_str(),
                        success.as_str(),
                        delta.as_str(),
                    ],
                    &COMPARISON_WIDTHS
                )
            )?;
        }
        writeln!(f, "{}", table_separator(&COMPARISON_WIDTHS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::RunConfig;
    use crate::cli::TransportKind;
    use crate::metrics::Reducer;
    use crate::probe::ContextSwitches;
    use crate::results::ResultsManager;
    use crate::sample::{FailureKind, TrialFailure};
    use crate::transport::{Target, TransportConfig};
    use std::time::Duration;

    fn results(kind: TransportKind, records: Vec<SampleRecord>) -> RunResults {
        let config = RunConfig::new(TransportConfig::new(
            kind,
            Target::new("https://127.0.0.1:8443/"),
        ));
        let summary = Reducer::default().reduce(&records);
        RunResults::new(config, records, summary, chrono::Utc::now(), Duration::from_secs(1))
    }

    fn ok(i: usize, ms: u64) -> SampleRecord {
        SampleRecord::success(
            i,
            chrono::Utc::now(),
            Duration::from_millis(i as u64 * 10),
            Duration::from_millis(ms),
            1024,
            "HTTP/2",
        )
    }

    fn failed(i: usize) -> SampleRecord {
        SampleRecord::failure(
            i,
            chrono::Utc::now(),
            Duration::from_millis(i as u64 * 10),
            Duration::from_millis(3),
            TrialFailure {
                kind: FailureKind::Connection,
                message: "connection refused".to_string(),
            },
        )
    }

    #[test]
    fn test_report_shows_first_n_trials() {
        colored::control::set_override(false);
        let records: Vec<SampleRecord> = (0..20).map(|i| ok(i, 5 + i as u64)).collect();
        let run = results(TransportKind::Http2, records);

        let text = RunReport::new(&run).show_trials(3).to_string();
        assert!(text.contains("First 3 of 20 trials:"));
        assert!(text.contains("P99:"));
        assert!(text.contains("Trimmed Mean:"));
        assert!(!text.contains("N/A"));
        let trial_rows = text
            .lines()
            .filter(|l| l.starts_with('|') && l.contains("HTTP/2"))
            .count();
        assert_eq!(trial_rows, 3);
    }

    #[test]
    fn test_report_without_successes() {
        colored::control::set_override(false);
        let run = results(TransportKind::Http1, (0..5).map(failed).collect());

        let text = RunReport::new(&run).to_string();
        assert!(text.contains("no successful trials"));
        assert!(text.contains("Throughput:          N/A"));
        assert!(text.contains("5 connection, 0 timeout, 0 read"));
        assert!(text.contains("ConnectionError: connection refused"));
    }

    #[test]
    fn test_report_includes_scheduling_when_probed() {
        colored::control::set_override(false);
        let records = vec![
            ok(0, 5).with_context_switches(ContextSwitches {
                voluntary: 2,
                involuntary: 1,
            }),
            ok(1, 6).with_context_switches(ContextSwitches::default()),
        ];
        let run = results(TransportKind::Http2, records);

        let text = SummaryBlock(&run.summary).to_string();
        assert!(text.contains("Preempted Trials:    1 of 2 probed (50.0% of all trials)"));
        assert!(text.contains("2 voluntary, 1 involuntary"));
    }

    #[test]
    fn test_rendering_does_not_change_results() {
        let run = results(TransportKind::Http2, vec![ok(0, 5), failed(1)]);
        let before = run.summary.clone();
        let _ = RunReport::new(&run).to_string();
        assert_eq!(run.summary, before);
        assert_eq!(run.records.len(), 2);
    }

    #[test]
    fn test_comparison_table() {
        colored::control::set_override(false);
        let mut manager = ResultsManager::new(None);
        manager.add_results(results(TransportKind::Http1, vec![ok(0, 10), ok(1, 10)]));
        manager.add_results(results(TransportKind::Http3, (0..2).map(failed).collect()));

        let text = ComparisonTable(&manager.comparison()).to_string();
        assert!(text.contains("baseline"));
        assert!(text.contains("HTTP/1.1"));
        assert!(text.contains("HTTP/3"));
        assert!(text.contains("0.0%"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer message", 10), "a much ...");
    }
}
