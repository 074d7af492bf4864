//! # Measurement Statistics
//!
//! Integer statistics used both by the warmup stop criterion and by the final
//! per-combination report, plus an HDR-histogram latency collector that keeps
//! the distribution of every steady-state batch latency across replays.
//!
//! All values are unsigned integers (microseconds for latencies, bytes per
//! second for throughputs), and the estimators floor their results so the
//! same sample always produces the same report.

use crate::error::{BenchError, Result};
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Microseconds per second, the time unit throughput is scaled to
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Mean and Bessel-corrected standard deviation of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStatistics {
    pub mean: u64,
    pub std: u64,
}

impl SampleStatistics {
    /// Compute `floor(sum / n)` and `floor(sqrt(sum((x - mean)^2) / (n - 1)))`.
    ///
    /// A single-element sample has a standard deviation of zero.
    pub fn compute(sample: &[u64]) -> Result<Self> {
        if sample.is_empty() {
            return Err(BenchError::EmptySample);
        }

        let n = sample.len() as u128;
        let sum: u128 = sample.iter().map(|&x| u128::from(x)).sum();
        let mean = (sum / n) as u64;

        let std = if sample.len() > 1 {
            let squares = sample.iter().fold(0u128, |acc, &x| {
                let deviation = u128::from(x.abs_diff(mean));
                acc.saturating_add(deviation * deviation)
            });
            integer_sqrt(squares / (n - 1)) as u64
        } else {
            0
        };

        Ok(Self { mean, std })
    }

    /// Warmup convergence test: `std <= coef * mean`
    pub fn is_stable(&self, coef: f64) -> bool {
        self.std as f64 <= coef * self.mean as f64
    }
}

/// Largest integer whose square does not exceed `n`
fn integer_sqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut root = (n as f64).sqrt() as u128;
    while root.checked_mul(root).map_or(true, |square| square > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).map_or(false, |square| square <= n) {
        root += 1;
    }
    root
}

/// Convert batch latencies (µs) into throughputs (bytes per second).
///
/// A batch that completed within the clock resolution is counted as taking
/// one microsecond.
pub fn to_throughput(latencies_us: &[u64], bytes_per_batch: u64) -> Vec<u64> {
    let bytes = u128::from(bytes_per_batch) * u128::from(MICROS_PER_SECOND);
    latencies_us
        .iter()
        .map(|&latency| {
            let rate = bytes / u128::from(latency.max(1));
            u64::try_from(rate).unwrap_or(u64::MAX)
        })
        .collect()
}

/// Distribution summary of steady-state batch latencies, in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub total_samples: u64,
}

/// Latency collector using an HDR histogram
pub struct LatencyCollector {
    histogram: Histogram<u64>,
}

impl LatencyCollector {
    pub fn new() -> Result<Self> {
        // 3 significant figures, auto-resizing.
        let mut histogram = Histogram::<u64>::new(3)?;
        histogram.auto(true);
        Ok(Self { histogram })
    }

    /// Record every latency of one run
    pub fn record_all(&mut self, latencies_us: &[u64]) {
        for &latency in latencies_us {
            // Auto-resizing histograms only reject values beyond u64 range limits.
            if self.histogram.record(latency).is_err() {
                tracing::trace!("Latency {}us outside histogram range", latency);
            }
        }
    }

    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Summary of everything recorded so far, `None` when nothing was recorded
    pub fn summary(&self) -> Option<LatencySummary> {
        if self.histogram.is_empty() {
            return None;
        }
        Some(LatencySummary {
            min_us: self.histogram.min(),
            max_us: self.histogram.max(),
            mean_us: self.histogram.mean(),
            p50_us: self.histogram.value_at_percentile(50.0),
            p95_us: self.histogram.value_at_percentile(95.0),
            p99_us: self.histogram.value_at_percentile(99.0),
            total_samples: self.histogram.len(),
        })
    }
}
