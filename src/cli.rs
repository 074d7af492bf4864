use crate::io::IoBackend;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage Benchmark - factorial throughput experiments for storage read/write primitives
///
/// The experiment description is read from the input file (or stdin). The
/// structured report goes to stdout, diagnostics to stderr.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Experiment description file (reads stdin when absent)
    #[clap(short = 'i', long, help_heading = "Core Options")]
    pub input: Option<PathBuf>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, help_heading = "Core Options")]
    pub output_file: Option<PathBuf>,

    /// Storage backend; the fakes never touch the device
    #[clap(long, value_enum, default_value_t = Backend::Posix, help_heading = "Backend Options")]
    pub backend: Backend,

    /// Per-request latency of the fixed fake backend, in microseconds
    #[clap(long, default_value_t = crate::defaults::FIXED_LATENCY_US, help_heading = "Backend Options")]
    pub fake_latency_us: u64,

    /// Latency pool of the cycling and random fake backends, in microseconds
    #[clap(long, value_delimiter = ',', help_heading = "Backend Options")]
    pub fake_pool_us: Option<Vec<u64>>,

    /// Seed for trial scheduling, offsets and the random fake (entropy when absent)
    #[clap(long)]
    pub seed: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[clap(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    /// Backend recipe selected on the command line
    pub fn io_backend(&self) -> IoBackend {
        match self.backend {
            Backend::Posix => IoBackend::Posix,
            Backend::Fixed => IoBackend::FixedLatency {
                latency_us: self.fake_latency_us,
            },
            Backend::Cycling => IoBackend::CyclingLatency {
                pool_us: self.pool_or(crate::defaults::CYCLING_POOL_US),
            },
            Backend::Random => IoBackend::RandomLatency {
                pool_us: self.pool_or(crate::defaults::RANDOM_POOL_US),
                seed: self.seed.unwrap_or_else(rand::random),
            },
        }
    }

    fn pool_or(&self, default: &[u64]) -> Vec<u64> {
        self.fake_pool_us
            .clone()
            .unwrap_or_else(|| default.to_vec())
    }
}

/// Storage backends selectable on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Backend {
    /// Real pread/pwrite/preadv/pwritev calls
    #[clap(name = "posix")]
    Posix,

    /// Every request costs a fixed latency
    #[clap(name = "fixed")]
    Fixed,

    /// Requests cycle through a latency pool
    #[clap(name = "cycling")]
    Cycling,

    /// Requests draw a random latency from a pool
    #[clap(name = "random")]
    Random,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Posix => write!(f, "posix"),
            Backend::Fixed => write!(f, "fixed"),
            Backend::Cycling => write!(f, "cycling"),
            Backend::Random => write!(f, "random"),
        }
    }
}
