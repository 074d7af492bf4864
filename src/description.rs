//! # Experiment Description Reader
//!
//! Parses the plain-text experiment description. Values are separated by
//! whitespace, except the file path and the preparation command, which each
//! take a whole line so they may contain spaces:
//!
//! ```text
//! 0 1                      consecutive flag, read flag
//! 2                        number of factors
//! RS 3 4096 65536 1048576  factor name, level count, levels
//! QD 1 4
//! 0.15 5000 100            warmup: threshold coefficient, max duration (ms), sample size
//! /mnt/test/testfile       file path
//! 512 1                    file size (MiB), unlink flag
//!                          preparation command (empty line for none)
//! 10000 5 3                test duration (ms), batch size, replays
//! ```
//!
//! Factors that are not declared keep their default level. Combinations are
//! the cartesian product of the declared levels, the first declared factor
//! varying fastest.

use crate::{
    config::{AccessPattern, EnvironmentSpec, Factor, FactorLevels, WarmupPolicy},
    error::{BenchError, Result},
    experiment::{Experiment, ExperimentConfig},
    io::IoBackend,
};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Parsed experiment description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDescription {
    pub pattern: AccessPattern,
    /// Declared factors with their levels, in declaration order
    pub factors: Vec<(Factor, Vec<u64>)>,
    pub warmup: WarmupPolicy,
    pub environment: EnvironmentSpec,
    pub test_duration: Duration,
    pub batch_size: usize,
    pub replays: usize,
}

impl ExperimentDescription {
    /// Read a description from `reader` until it is complete.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let lines = reader
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| BenchError::invalid(format!("cannot read experiment description: {}", e)))?;
        Self::from_lines(lines)
    }

    fn from_lines(lines: Vec<String>) -> Result<Self> {
        let mut tokens = Tokens::new(lines);

        let pattern = AccessPattern {
            consecutive: tokens.flag("consecutive access flag")?,
            is_read: tokens.flag("read operation flag")?,
        };

        let count: usize = tokens.number("number of factors")?;
        if count == 0 {
            return Err(BenchError::invalid("number of factors must be non-zero"));
        }
        let mut factors: Vec<(Factor, Vec<u64>)> = Vec::with_capacity(count);
        for _ in 0..count {
            let factor: Factor = tokens.next("factor name")?.parse()?;
            if factors.iter().any(|(declared, _)| *declared == factor) {
                return Err(BenchError::invalid(format!(
                    "levels for factor {} declared twice",
                    factor
                )));
            }
            let level_count: usize = tokens.number("factor levels count")?;
            if level_count == 0 {
                return Err(BenchError::invalid(format!("factor {} has 0 levels", factor)));
            }
            let levels = (0..level_count)
                .map(|i| tokens.number::<u64>(&format!("level #{} of factor {}", i + 1, factor)))
                .collect::<Result<Vec<_>>>()?;
            factors.push((factor, levels));
        }

        let warmup = WarmupPolicy {
            threshold_coef: tokens.number("warmup threshold coefficient")?,
            max_duration: Duration::from_millis(tokens.number("warmup max duration (ms)")?),
            sample_size: tokens.number("warmup sample size")?,
        };

        let filepath = tokens
            .line()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| BenchError::invalid("missing file path"))?;
        let filesize_mib: u64 = tokens.number("file size (MiB)")?;
        let filesize = filesize_mib
            .checked_mul(BYTES_PER_MIB)
            .ok_or_else(|| BenchError::invalid(format!("file size {} MiB is out of range", filesize_mib)))?;
        let unlink = tokens.flag("unlink flag")?;
        let preparation_script = tokens.line().filter(|line| !line.is_empty());
        let environment = EnvironmentSpec {
            filepath: PathBuf::from(filepath),
            filesize,
            unlink,
            preparation_script,
        };

        let test_duration = Duration::from_millis(tokens.number("test duration (ms)")?);
        let batch_size: usize = tokens.number("batch size")?;
        let replays: usize = tokens.number("replays")?;

        let description = Self {
            pattern,
            factors,
            warmup,
            environment,
            test_duration,
            batch_size,
            replays,
        };
        let varying = description.varying_factors();
        if varying.len() > 2 {
            return Err(BenchError::invalid(format!(
                "there must be no more than 2 varying factors, {} specified",
                varying.len()
            )));
        }
        Ok(description)
    }

    /// Declared factors with more than one level
    pub fn varying_factors(&self) -> Vec<Factor> {
        self.factors
            .iter()
            .filter(|(_, levels)| levels.len() > 1)
            .map(|(factor, _)| *factor)
            .collect()
    }

    /// Cartesian product of the declared levels over the defaults.
    ///
    /// Combination `i + n * j` pairs combination `i` of the factors declared so
    /// far (`n` of them) with level `j` of the next factor.
    pub fn combinations(&self) -> Result<Vec<FactorLevels>> {
        let mut combinations = vec![FactorLevels::default()];
        for (factor, levels) in &self.factors {
            let mut next = Vec::with_capacity(combinations.len() * levels.len());
            for &level in levels {
                for combination in &combinations {
                    next.push(combination.with_level(*factor, level)?);
                }
            }
            combinations = next;
        }
        Ok(combinations)
    }

    pub fn to_config(&self) -> Result<ExperimentConfig> {
        let config = ExperimentConfig {
            pattern: self.pattern,
            combinations: self.combinations()?,
            warmup: self.warmup,
            environment: self.environment.clone(),
            test_duration: self.test_duration,
            batch_size: self.batch_size,
            replays: self.replays,
            varying_factors: self.varying_factors(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every combination and bind the experiment to `backend`
    pub fn into_experiment(self, backend: IoBackend) -> Result<Experiment> {
        Experiment::new(self.to_config()?, backend)
    }
}

impl FromStr for ExperimentDescription {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_lines(s.lines().map(str::to_owned).collect())
    }
}

/// Cursor over whitespace-separated tokens that can also hand out whole lines
struct Tokens {
    lines: Vec<String>,
    line: usize,
    column: usize,
}

impl Tokens {
    fn new(lines: Vec<String>) -> Self {
        Self {
            lines,
            line: 0,
            column: 0,
        }
    }

    fn next(&mut self, what: &str) -> Result<&str> {
        while self.line < self.lines.len() {
            let rest = &self.lines[self.line][self.column..];
            let trimmed = rest.trim_start();
            if trimmed.is_empty() {
                self.line += 1;
                self.column = 0;
                continue;
            }
            let start = self.column + (rest.len() - trimmed.len());
            let len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
            self.column = start + len;
            return Ok(&self.lines[self.line][start..start + len]);
        }
        Err(BenchError::invalid(format!("unexpected end of input, expected {}", what)))
    }

    fn number<T: FromStr>(&mut self, what: &str) -> Result<T> {
        let token = self.next(what)?;
        token
            .parse()
            .map_err(|_| BenchError::invalid(format!("invalid value \"{}\" for {}", token, what)))
    }

    fn flag(&mut self, what: &str) -> Result<bool> {
        match self.number::<u64>(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BenchError::invalid(format!("{} must be 0 or 1, got {}", what, other))),
        }
    }

    /// Rest of the current line if it holds anything, the next line otherwise.
    ///
    /// Returns `None` at the end of input.
    fn line(&mut self) -> Option<String> {
        if self.line < self.lines.len() {
            let rest = self.lines[self.line][self.column..].trim().to_owned();
            self.line += 1;
            self.column = 0;
            if !rest.is_empty() {
                return Some(rest);
            }
        }
        let next = self.lines.get(self.line)?.trim().to_owned();
        self.line += 1;
        Some(next)
    }
}
