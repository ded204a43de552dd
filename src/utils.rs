//! # Utility Functions and Helper Module
//!
//! Formatting and system helpers shared by the report emitter, the results
//! manager and the binary.
//!
//! ## Key Functionality Categories
//!
//! - **Formatting**: Human-readable display of durations, bytes and rates
//! - **System Information**: Container detection for results metadata
//! - **Display Helpers**: Plain-text table rows and separators
//!
//! ## Usage Examples
//!
//! ```rust
//! use transport_bench::utils::*;
//! use std::time::Duration;
//!
//! let duration_str = format_duration(Duration::from_micros(1500));
//! assert_eq!(duration_str, "1.50ms");
//!
//! let rate_str = format_rate(1048576.0);
//! assert_eq!(rate_str, "1.00 MB/s");
//! ```

use std::fmt::Write;
use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for a run
///
/// String representation of a UUID v4, recorded in the results file so runs
/// from different invocations can be told apart.
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// Sub-second values use two decimal places; values of a minute or more use a
/// compound `1m 30s` form.
///
/// ```rust
/// # use transport_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(750)), "750ns");
/// assert_eq!(format_duration(Duration::from_nanos(1250)), "1.25μs");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// `format_duration`, or `N/A` when the value is absent
pub fn format_optional_duration(duration: Option<Duration>) -> String {
    duration.map_or_else(|| "N/A".to_string(), format_duration)
}

/// Format a byte count using binary (1024-based) units
///
/// ```rust
/// # use transport_bench::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(2621440), "2.50 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    format_bytes_f64(bytes as f64)
}

pub fn format_bytes_f64(bytes: f64) -> String {
    if bytes < 1024.0 {
        format!("{:.0} B", bytes)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a throughput rate with a `/s` suffix
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", format_bytes_f64(bytes_per_second))
}

/// Signed percentage change, e.g. `+12.5%` or `-3.0%`
pub fn format_delta_percent(delta: f64) -> String {
    format!("{:+.1}%", delta)
}

/// Check if running in a container environment
///
/// Looks for docker, lxc or containerd markers in `/proc/1/cgroup`; returns
/// false when the file cannot be read (including on non-Linux systems).
pub fn is_container_environment() -> bool {
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|contents| {
            contents.contains("docker") || contents.contains("lxc") || contents.contains("containerd")
        })
        .unwrap_or(false)
}

/// Format one table row with `|` column borders
///
/// Missing widths default to 10 characters.
///
/// ```rust
/// # use transport_bench::utils::{table_row, table_separator};
/// let widths = [10, 8];
/// assert_eq!(table_separator(&widths), "+------------+----------+");
/// assert_eq!(table_row(&["HTTP/2", "1.5ms"], &widths), "| HTTP/2     | 1.5ms    |");
/// ```
pub fn table_row(columns: &[&str], widths: &[usize]) -> String {
    let mut row = String::from("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        let _ = write!(row, " {:width$} |", column, width = width);
    }
    row
}

/// Format a table separator matching `table_row` widths
pub fn table_separator(widths: &[usize]) -> String {
    let mut line = String::from("+");
    for &width in widths {
        line.push_str(&"-".repeat(width + 2));
        line.push('+');
    }
    line
}
