use crate::{benchmark::RunConfig, cli::TransportKind, metrics::Summary, sample::SampleRecord};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Complete results of one transport run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: String,
    pub transport: TransportKind,
    pub target: String,
    /// Protocol label negotiated by the first successful measured trial
    pub protocol: Option<String>,
    pub config: RunConfig,
    pub records: Vec<SampleRecord>,
    pub summary: Summary,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Wall-clock time of warm-up plus measurement
    pub wall_duration: Duration,
}

impl RunResults {
    pub fn new(
        config: RunConfig,
        records: Vec<SampleRecord>,
        summary: Summary,
        timestamp: chrono::DateTime<chrono::Utc>,
        wall_duration: Duration,
    ) -> Self {
        let protocol = records
            .iter()
            .find_map(|record| record.protocol())
            .map(str::to_string);
        Self {
            run_id: crate::utils::generate_run_id(),
            transport: config.transport.kind,
            target: config.transport.target.to_string(),
            protocol,
            config,
            records,
            summary,
            timestamp,
            wall_duration,
        }
    }

    /// The first `n` measured records, in trial order
    pub fn first_records(&self, n: usize) -> &[SampleRecord] {
        &self.records[..n.min(self.records.len())]
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub in_container: bool,
    pub benchmark_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            in_container: crate::utils::is_container_environment(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// One row of the cross-transport comparison
///
/// The first run added to the `ResultsManager` is the baseline; deltas are
/// relative to its median.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub transport: TransportKind,
    pub protocol: Option<String>,
    pub median: Option<Duration>,
    pub p99: Option<Duration>,
    pub trimmed_mean: Option<Duration>,
    pub bytes_per_second: Option<f64>,
    pub success_rate: f64,
    /// Median change against the baseline, in percent
    pub median_delta_percent: Option<f64>,
    pub is_baseline: bool,
}

/// Results manager for collecting runs and writing the results file
pub struct ResultsManager {
    output_file: Option<PathBuf>,
    results: Vec<RunResults>,
}

impl ResultsManager {
    /// Create a new results manager; `None` keeps results in memory only
    pub fn new(output_file: Option<&Path>) -> Self {
        Self {
            output_file: output_file.map(Path::to_path_buf),
            results: Vec::new(),
        }
    }

    pub fn add_results(&mut self, results: RunResults) {
        info!("Adding results for {} transport", results.transport);
        self.results.push(results);
    }

    pub fn results(&self) -> &[RunResults] {
        &self.results
    }

    /// Comparison rows for every run, in the order they were added
    pub fn comparison(&self) -> Vec<ComparisonRow> {
        let baseline = self
            .results
            .first()
            .and_then(|r| r.summary.latency.as_ref())
            .map(|l| l.median);

        self.results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let latency = result.summary.latency.as_ref();
                let median = latency.map(|l| l.median);
                let median_delta_percent = match (baseline, median) {
                    (Some(base), Some(median)) if !base.is_zero() => Some(
                        (median.as_secs_f64() - base.as_secs_f64()) / base.as_secs_f64() * 100.0,
                    ),
                    _ => None,
                };
                ComparisonRow {
                    transport: result.transport,
                    protocol: result.protocol.clone(),
                    median,
                    p99: latency.and_then(|l| l.percentile(99.0)),
                    trimmed_mean: latency.map(|l| l.trimmed_mean),
                    bytes_per_second: result
                        .summary
                        .throughput
                        .as_ref()
                        .map(|t| t.bytes_per_second),
                    success_rate: result.summary.success_rate(),
                    median_delta_percent,
                    is_baseline: i == 0,
                }
            })
            .collect()
    }

    /// Write the results file if one was configured
    ///
    /// Returns the path written, if any.
    pub fn finalize(&self) -> Result<Option<PathBuf>> {
        let Some(path) = &self.output_file else {
            debug!("No output file configured; results not written");
            return Ok(None);
        };

        let document = ResultsDocument {
            metadata: ResultsMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                total_runs: self.results.len(),
                system_info: SystemInfo::collect(),
            },
            runs: self.results.clone(),
            comparison: self.comparison(),
        };

        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;

        info!("Results written to: {:?}", path);
        Ok(Some(path.clone()))
    }
}

/// Results file layout
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub metadata: ResultsMetadata,
    pub runs: Vec<RunResults>,
    pub comparison: Vec<ComparisonRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub total_runs: usize,
    pub system_info: SystemInfo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Reducer;
    use crate::transport::{Target, TransportConfig};
    use tempfile::NamedTempFile;

    fn run(kind: TransportKind, latencies_ms: &[u64]) -> RunResults {
        let config = RunConfig::new(TransportConfig::new(
            kind,
            Target::new("https://127.0.0.1:8443/"),
        ));
        let now = chrono::Utc::now();
        let records: Vec<SampleRecord> = latencies_ms
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                SampleRecord::success(
                    i,
                    now,
                    Duration::from_millis(i as u64 * 10),
                    Duration::from_millis(ms),
                    2048,
                    kind.to_string(),
                )
            })
            .collect();
        let summary = Reducer::default().reduce(&records);
        RunResults::new(config, records, summary, now, Duration::from_secs(1))
    }

    #[test]
    fn test_run_results_creation() {
        let results = run(TransportKind::Http2, &[10, 20, 30]);
        assert_eq!(results.transport, TransportKind::Http2);
        assert_eq!(results.protocol.as_deref(), Some("HTTP/2"));
        assert_eq!(results.target, "https://127.0.0.1:8443/");
        assert_eq!(results.first_records(2).len(), 2);
        assert_eq!(results.first_records(10).len(), 3);
        assert!(!results.run_id.is_empty());
    }

    #[test]
    fn test_comparison_against_first_run() {
        let mut manager = ResultsManager::new(None);
        manager.add_results(run(TransportKind::Http1, &[10, 20, 30]));
        manager.add_results(run(TransportKind::Http2, &[5, 10, 15]));

        let rows = manager.comparison();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_baseline);
        assert_eq!(rows[0].median, Some(Duration::from_millis(20)));
        assert_eq!(rows[0].median_delta_percent, Some(0.0));
        assert!(!rows[1].is_baseline);
        let delta = rows[1].median_delta_percent.unwrap();
        assert!((delta - -50.0).abs() < 1e-9);
        assert_eq!(rows[1].success_rate, 100.0);
    }

    #[test]
    fn test_finalize_without_output_file() {
        let mut manager = ResultsManager::new(None);
        manager.add_results(run(TransportKind::Http1, &[10]));
        assert!(manager.finalize().unwrap().is_none());
    }

    #[test]
    fn test_finalize_writes_json() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut manager = ResultsManager::new(Some(temp_file.path()));
        manager.add_results(run(TransportKind::Http1, &[10, 20]));
        manager.add_results(run(TransportKind::Http2, &[8, 12]));

        let written = manager.finalize().unwrap();
        assert_eq!(written.as_deref(), Some(temp_file.path()));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        assert_eq!(json["metadata"]["total_runs"], 2);
        assert_eq!(json["runs"].as_array().unwrap().len(), 2);
        assert_eq!(json["runs"][0]["transport"], "Http1");
        assert_eq!(json["comparison"][1]["is_baseline"], false);
        assert!(json["metadata"]["system_info"]["cpu_cores"].as_u64().unwrap() > 0);
    }
}
