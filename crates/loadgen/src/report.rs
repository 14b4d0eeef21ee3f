//! Run summary and metrics artifact
//!
//! Pure reduction over the collected samples: latency percentiles via
//! sorted linear interpolation, throughput over the wall time, and the
//! delimited artifact with one row per dispatch attempt.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use slopestream_types::RequestMetrics;

use crate::dispatcher::DispatchReport;

/// Aggregated latency/throughput view of one run
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub wall_time_ms: u64,
    pub throughput_rps: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub p99_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencySummary {
    /// Compute the summary; `None` when the run recorded no samples
    pub fn compute(report: &DispatchReport) -> Option<Self> {
        if report.metrics.is_empty() {
            return None;
        }

        let mut latencies: Vec<f64> = report
            .metrics
            .iter()
            .map(|m| m.latency_ms as f64)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = latencies.iter().sum();
        let wall_time_ms = report.wall_time.as_millis() as u64;
        let throughput_rps = if wall_time_ms > 0 {
            report.requests_sent as f64 / (wall_time_ms as f64 / 1000.0)
        } else {
            0.0
        };

        Some(Self {
            total_requests: report.requests_sent,
            failed_requests: report.failed_requests,
            wall_time_ms,
            throughput_rps,
            mean_ms: sum / latencies.len() as f64,
            median_ms: percentile(&latencies, 50.0)?,
            p99_ms: percentile(&latencies, 99.0)?,
            min_ms: latencies.first().copied()? as u64,
            max_ms: latencies.last().copied()? as u64,
        })
    }
}

/// Percentile from sorted values using linear interpolation
fn percentile(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }

    let rank = (percentile / 100.0) * (sorted.len() - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;

    if lower_idx == upper_idx {
        Some(sorted[lower_idx])
    } else {
        let fraction = rank - lower_idx as f64;
        Some(sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction)
    }
}

/// Write the metrics artifact: a header plus one row per dispatch attempt
pub fn write_metrics_csv(path: &Path, samples: &[RequestMetrics]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "StartTime,RequestType,Latency,ResponseCode")?;
    for sample in samples {
        writeln!(writer, "{}", sample.csv_row())?;
    }
    writer.flush()
}
