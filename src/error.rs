//! Error taxonomy for the benchmark engine.
//!
//! Every failure the library can report is fatal to the run that raised it:
//! nothing is retried, and the binary aborts the whole experiment on the first
//! error it sees.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the benchmark engine
#[derive(Debug, Error)]
pub enum BenchError {
    /// The target file could not be prepared (removed, created, opened) or
    /// the preparation command failed.
    #[error("environment error at {path}: {source}")]
    Environment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The experiment description or configuration is inconsistent.
    #[error("invalid experiment description: {0}")]
    InputValidation(String),

    /// Statistics were requested over an empty sample.
    #[error("cannot compute statistics of an empty sample")]
    EmptySample,

    /// An I/O buffer of the requested size cannot be laid out in memory.
    #[error("cannot allocate an I/O buffer of {size} bytes")]
    Allocation { size: usize },

    /// The latency histogram could not be created.
    #[error("cannot create latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    /// A handle that was never issued by this factory.
    #[error("storage I/O handle {0} was not issued by this factory")]
    StaleHandle(usize),
}

impl BenchError {
    /// Shorthand for building an [`BenchError::InputValidation`] error.
    pub fn invalid(message: impl Into<String>) -> Self {
        BenchError::InputValidation(message.into())
    }

    pub(crate) fn environment(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BenchError::Environment {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, BenchError>;
