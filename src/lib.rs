//! # Storage Benchmark Library
//!
//! Factorial latency and throughput experiments for the storage read/write
//! primitives of the operating system (`pread`, `pwrite`, `preadv`, `pwritev`).
//!
//! An experiment fixes a workload pattern (sequential or random, read or
//! write), varies up to two factors (request size, queue depth, direct I/O)
//! over a set of levels, and for every combination of levels measures batches
//! of requests against a pre-filled file until the latency is stable, then
//! samples the steady state for a fixed duration. Every combination is
//! replayed several times in a randomized order and reported as the mean and
//! standard deviation of its throughput.
//!
//! ## Architecture Overview
//!
//! - `io`: the [`StorageIo`] trait, the POSIX backend, deterministic fake
//!   backends and the [`IoFactory`] arena that owns them
//! - `benchmark`: the per-combination [`BenchmarkRunner`] and its warmup state machine
//! - `experiment`: randomized scheduling and aggregation over combinations and replays
//! - `description`: the plain-text experiment description reader
//! - `metrics`: integer sample statistics and the HDR latency collector
//! - `results`: the text report and the JSON results file
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use storage_benchmark::{ExperimentDescription, IoBackend};
//!
//! fn main() -> anyhow::Result<()> {
//!     let description: ExperimentDescription =
//!         "0 1\n1\nRS 2 4096 65536\n0.15 5000 100\ntestfile\n512 1\n\n10000 5 3\n".parse()?;
//!     let experiment = description.into_experiment(IoBackend::Posix)?;
//!
//!     let result = experiment.run(&mut StdRng::from_entropy())?;
//!     for (mean, std) in result.pairs() {
//!         println!("{} +/- {} B/s", mean, std);
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(not(unix))]
compile_error!("storage-benchmark requires a Unix platform (positional and vectored file I/O)");

/// Per-combination benchmark engine
///
/// Prepares the target file, warms up until batch latency is stable and
/// samples the steady state.
pub mod benchmark;

/// Command-line interface
pub mod cli;

/// Experiment data model: access pattern, factors, warmup policy, environment
pub mod config;

/// Plain-text experiment description reader
pub mod description;

pub mod error;

/// Factorial experiment orchestration
pub mod experiment;

/// Storage I/O abstraction and backends
pub mod io;

pub mod logging;

/// Sample statistics and latency distribution
pub mod metrics;

/// Text report and JSON results file
pub mod results;

pub mod utils;

pub use benchmark::{BenchmarkConfig, BenchmarkRunner, RunOutcome, RunPhase};
pub use config::{AccessPattern, EnvironmentSpec, Factor, FactorLevels, WarmupPolicy};
pub use description::ExperimentDescription;
pub use error::{BenchError, Result};
pub use experiment::{generate_order, Experiment, ExperimentConfig, ExperimentResult};
pub use io::{IoBackend, IoFactory, IoHandle, IoOutcome, StorageIo};
pub use metrics::SampleStatistics;
pub use results::ResultsManager;

/// The current version of the storage benchmark
///
/// Populated from Cargo.toml and recorded in the JSON results file.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Request size of combinations that do not declare `RS`
    pub const REQUEST_SIZE: u64 = 64 * 1024;

    /// Queue depth of combinations that do not declare `QD`
    pub const QUEUE_DEPTH: u64 = 8;

    /// Per-request latency of the fixed fake backend
    pub const FIXED_LATENCY_US: u64 = 15;

    /// Latency pool of the cycling fake backend
    pub const CYCLING_POOL_US: &[u64] = &[20, 30, 40];

    /// Latency pool of the random fake backend
    pub const RANDOM_POOL_US: &[u64] = &[10, 20, 60];
}
