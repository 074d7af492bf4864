//! # Result Reporting
//!
//! Two outputs are produced for every experiment:
//!
//! - the **text report** on stdout, one value per line, consumed by plotting
//!   and post-processing scripts:
//!
//!   ```text
//!   <consecutive flag>
//!   <read flag>
//!   <result count>
//!   <varying factor count: 0, 1 or 2>
//!   then per result:
//!     <factor name>\n<level>    for each varying factor
//!     <mean throughput>
//!     <std throughput>
//!   ```
//!
//! - an optional **JSON results file** written by [`ResultsManager`], which adds
//!   run metadata, system information, the experiment configuration and the
//!   latency distribution of every combination.

use crate::{
    experiment::{ExperimentConfig, ExperimentResult},
    io::IoBackend,
    utils::{format_duration, format_rate, generate_run_id},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write the line-oriented text report
pub fn write_report<W: Write>(out: &mut W, result: &ExperimentResult) -> std::io::Result<()> {
    let varying = &result.varying_factors;
    writeln!(out, "{}", u8::from(result.pattern.consecutive))?;
    writeln!(out, "{}", u8::from(result.pattern.is_read))?;
    writeln!(out, "{}", result.results.len())?;
    writeln!(out, "{}", if varying.len() <= 2 { varying.len() } else { 0 })?;

    for combination in &result.results {
        if varying.len() <= 2 {
            for factor in varying {
                writeln!(out, "{}", factor)?;
                writeln!(out, "{}", combination.levels.level(*factor))?;
            }
        }
        writeln!(out, "{}", combination.throughput.mean)?;
        writeln!(out, "{}", combination.throughput.std)?;
    }
    out.flush()
}

/// Log a human-readable summary of every combination
pub fn log_summary(result: &ExperimentResult) {
    info!("Experiment finished in {}", format_duration(result.elapsed));
    for combination in &result.results {
        let latency = match &combination.latency {
            Some(latency) => format!(
                " | batch latency p50 {}us p99 {}us max {}us",
                latency.p50_us, latency.p99_us, latency.max_us
            ),
            None => String::new(),
        };
        info!(
            "{}: {} +/- {} over {} points{}",
            combination.levels,
            format_rate(combination.throughput.mean as f64),
            format_rate(combination.throughput.std as f64),
            combination.points,
            latency
        );
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
    pub benchmark_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub backend: IoBackend,
    pub seed: Option<u64>,
    pub system_info: SystemInfo,
}

/// Document written to the JSON results file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsDocument {
    pub metadata: RunMetadata,
    pub experiment: ExperimentConfig,
    pub result: ExperimentResult,
}

/// Writes the JSON results file
pub struct ResultsManager {
    output_file: PathBuf,
    metadata: RunMetadata,
}

impl ResultsManager {
    /// Prepare a manager; metadata is captured now, when the run starts.
    pub fn new(output_file: &Path, backend: &IoBackend, seed: Option<u64>) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
            metadata: RunMetadata {
                version: crate::VERSION.to_string(),
                run_id: generate_run_id(),
                timestamp: chrono::Utc::now(),
                backend: backend.clone(),
                seed,
                system_info: SystemInfo::collect(),
            },
        }
    }

    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    /// Serialize the experiment and its result and write them out
    pub fn finalize(&self, experiment: &ExperimentConfig, result: &ExperimentResult) -> Result<()> {
        let document = ResultsDocument {
            metadata: self.metadata.clone(),
            experiment: experiment.clone(),
            result: result.clone(),
        };
        let json = serde_json::to_string_pretty(&document).context("Failed to serialize results")?;
        std::fs::write(&self.output_file, json).with_context(|| {
            format!("Failed to write results to {}", self.output_file.display())
        })?;

        info!("Results written to {}", self.output_file.display());
        Ok(())
    }
}
