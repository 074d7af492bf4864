//! # Experiment Data Model
//!
//! Immutable value types describing one experiment: the access pattern shared
//! by every trial, the factor levels identifying one point in factor space,
//! the warmup stop criterion and the environment the target file lives in.
//!
//! All sizes are in bytes and all durations are `std::time::Duration`; the
//! textual description uses milliseconds and MiB and is converted on input.

use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Workload pattern, fixed for the whole experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPattern {
    /// Requests walk the file sequentially (random offsets otherwise)
    pub consecutive: bool,
    /// Requests read from the file (write otherwise)
    pub is_read: bool,
}

/// A configurable dimension of the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Factor {
    /// Size of one request (or one vectored sub-buffer) in bytes
    RequestSize,
    /// Number of sub-buffers issued together through one vectored call
    QueueDepth,
    /// Bypass the OS page cache
    DirectIo,
}

impl Factor {
    pub const ALL: [Factor; 3] = [Factor::RequestSize, Factor::QueueDepth, Factor::DirectIo];

    /// Short name used by the experiment description and the report
    pub fn code(self) -> &'static str {
        match self {
            Factor::RequestSize => "RS",
            Factor::QueueDepth => "QD",
            Factor::DirectIo => "DIO",
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Factor {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Factor::ALL
            .into_iter()
            .find(|factor| factor.code() == s)
            .ok_or_else(|| {
                BenchError::invalid(format!(
                    "incorrect factor name \"{}\"; supported values are \"RS\", \"QD\", \"DIO\"",
                    s
                ))
            })
    }
}

/// One point in factor space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorLevels {
    pub request_size: u64,
    pub queue_depth: u64,
    pub direct_io: bool,
}

impl Default for FactorLevels {
    fn default() -> Self {
        Self {
            request_size: crate::defaults::REQUEST_SIZE,
            queue_depth: crate::defaults::QUEUE_DEPTH,
            direct_io: false,
        }
    }
}

impl FactorLevels {
    /// Bytes covered by one request: `request_size * queue_depth`
    pub fn span(&self) -> u64 {
        self.request_size.saturating_mul(self.queue_depth)
    }

    /// Numeric level of `factor` as it appears in the report
    pub fn level(&self, factor: Factor) -> u64 {
        match factor {
            Factor::RequestSize => self.request_size,
            Factor::QueueDepth => self.queue_depth,
            Factor::DirectIo => u64::from(self.direct_io),
        }
    }

    /// Copy of these levels with `factor` set to `level`
    pub fn with_level(mut self, factor: Factor, level: u64) -> Result<Self> {
        match factor {
            Factor::RequestSize => self.request_size = level,
            Factor::QueueDepth => self.queue_depth = level,
            Factor::DirectIo => {
                self.direct_io = match level {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(BenchError::invalid(format!(
                            "DIO level must be 0 or 1, got {}",
                            other
                        )))
                    }
                }
            }
        }
        Ok(self)
    }

    /// Check that the levels describe a runnable point for a file of `filesize` bytes
    pub fn validate(&self, filesize: u64) -> Result<()> {
        if self.request_size == 0 {
            return Err(BenchError::invalid("request size cannot be zero"));
        }
        if self.queue_depth == 0 {
            return Err(BenchError::invalid("queue depth cannot be zero"));
        }
        if usize::try_from(self.request_size).is_err() {
            return Err(BenchError::invalid(format!(
                "request size {} does not fit in memory",
                self.request_size
            )));
        }
        if self.span() > filesize {
            return Err(BenchError::invalid(format!(
                "request size {} * queue depth {} exceeds file size {}",
                self.request_size, self.queue_depth, filesize
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FactorLevels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RS={} QD={} DIO={}",
            self.request_size,
            self.queue_depth,
            u8::from(self.direct_io)
        )
    }
}

/// Warmup stop criterion: `std <= threshold_coef * mean` or `max_duration` elapsed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupPolicy {
    pub threshold_coef: f64,
    pub max_duration: Duration,
    /// Number of most recent batch latencies the criterion is evaluated over
    pub sample_size: usize,
}

impl WarmupPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.sample_size == 0 {
            return Err(BenchError::invalid("warmup sample size cannot be zero"));
        }
        if !self.threshold_coef.is_finite() {
            return Err(BenchError::invalid(format!(
                "warmup threshold coefficient must be finite, got {}",
                self.threshold_coef
            )));
        }
        Ok(())
    }
}

/// Location and shape of the file under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub filepath: PathBuf,
    pub filesize: u64,
    /// Remove any pre-existing file before the run (and the created one after it)
    pub unlink: bool,
    /// Shell command run after unlinking and before the file is filled
    pub preparation_script: Option<String>,
}

impl EnvironmentSpec {
    pub fn validate(&self) -> Result<()> {
        if self.filesize == 0 {
            return Err(BenchError::invalid("file size cannot be zero"));
        }
        if self.filepath.as_os_str().is_empty() {
            return Err(BenchError::invalid("file path cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_parsing() {
        assert_eq!("RS".parse::<Factor>().unwrap(), Factor::RequestSize);
        assert_eq!("QD".parse::<Factor>().unwrap(), Factor::QueueDepth);
        assert_eq!("DIO".parse::<Factor>().unwrap(), Factor::DirectIo);
        assert!("rs".parse::<Factor>().is_err());
        assert!("BS".parse::<Factor>().is_err());
        assert_eq!(Factor::DirectIo.to_string(), "DIO");
    }

    #[test]
    fn test_factor_levels_set_and_get() {
        let levels = FactorLevels::default()
            .with_level(Factor::RequestSize, 4096)
            .unwrap()
            .with_level(Factor::DirectIo, 1)
            .unwrap();

        assert_eq!(levels.level(Factor::RequestSize), 4096);
        assert_eq!(levels.level(Factor::QueueDepth), crate::defaults::QUEUE_DEPTH);
        assert_eq!(levels.level(Factor::DirectIo), 1);
        assert_eq!(levels.span(), 4096 * crate::defaults::QUEUE_DEPTH);
        assert!(FactorLevels::default().with_level(Factor::DirectIo, 2).is_err());
    }

    #[test]
    fn test_factor_levels_validation() {
        let levels = FactorLevels {
            request_size: 4096,
            queue_depth: 4,
            direct_io: false,
        };
        assert!(levels.validate(4096 * 4).is_ok());
        assert!(levels.validate(4096 * 4 - 1).is_err());

        let zero_rs = FactorLevels {
            request_size: 0,
            ..levels
        };
        assert!(zero_rs.validate(1 << 20).is_err());

        let zero_qd = FactorLevels {
            queue_depth: 0,
            ..levels
        };
        assert!(zero_qd.validate(1 << 20).is_err());
    }

    #[test]
    fn test_warmup_policy_validation() {
        let policy = WarmupPolicy {
            threshold_coef: 0.15,
            max_duration: Duration::from_secs(1),
            sample_size: 100,
        };
        assert!(policy.validate().is_ok());
        assert!(WarmupPolicy {
            sample_size: 0,
            ..policy
        }
        .validate()
        .is_err());
        assert!(WarmupPolicy {
            threshold_coef: f64::NAN,
            ..policy
        }
        .validate()
        .is_err());
    }
}
