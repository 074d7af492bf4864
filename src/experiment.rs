//! # Experiment Orchestration
//!
//! An [`Experiment`] runs a full factorial design: one [`BenchmarkRunner`] per
//! factor-level combination, each with its own [`IoFactory`](crate::io::IoFactory),
//! replayed `replays` times in a randomized order so slow drifts of the device
//! (thermal state, background activity, cache pressure) spread evenly across
//! combinations instead of biasing the ones measured last.
//!
//! Each trial's batch latencies are converted to throughput and summed point
//! by point per combination. After the last trial the sums are averaged over
//! the replays and reduced to one `(mean, std)` pair per combination.

use crate::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    config::{AccessPattern, EnvironmentSpec, Factor, FactorLevels, WarmupPolicy},
    error::{BenchError, Result},
    io::IoBackend,
    metrics::{to_throughput, LatencyCollector, LatencySummary, SampleStatistics},
};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Everything that defines an experiment, independent of the backend it runs on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub pattern: AccessPattern,
    /// Points of factor space, in report order
    pub combinations: Vec<FactorLevels>,
    pub warmup: WarmupPolicy,
    pub environment: EnvironmentSpec,
    pub test_duration: Duration,
    pub batch_size: usize,
    pub replays: usize,
    /// Factors with more than one level, in declaration order; reporting only
    pub varying_factors: Vec<Factor>,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.combinations.is_empty() {
            return Err(BenchError::invalid("experiment has no factor combinations"));
        }
        if self.replays == 0 {
            return Err(BenchError::invalid("replays cannot be zero"));
        }
        if self.varying_factors.len() > 2 {
            return Err(BenchError::invalid(format!(
                "there must be no more than 2 varying factors, {} specified",
                self.varying_factors.len()
            )));
        }
        for levels in &self.combinations {
            self.benchmark_config(*levels).validate()?;
        }
        Ok(())
    }

    /// Runner configuration of one combination
    pub fn benchmark_config(&self, levels: FactorLevels) -> BenchmarkConfig {
        BenchmarkConfig {
            pattern: self.pattern,
            levels,
            warmup: self.warmup,
            environment: self.environment.clone(),
            test_duration: self.test_duration,
            batch_size: self.batch_size,
        }
    }

    /// Total number of trials: `combinations * replays`
    pub fn trials(&self) -> usize {
        self.combinations.len() * self.replays
    }
}

/// Trial schedule: every index in `0..combinations` exactly `replays` times, shuffled
pub fn generate_order<R: Rng + ?Sized>(combinations: usize, replays: usize, rng: &mut R) -> Vec<usize> {
    let mut order: Vec<usize> = (0..combinations * replays).map(|i| i % combinations).collect();
    order.shuffle(rng);
    order
}

/// Pointwise running sum of the throughput sequences of one combination.
///
/// Only the length of the shortest sequence added so far is kept.
#[derive(Debug, Clone, Default)]
struct ReplaySum {
    values: Option<Vec<u128>>,
}

impl ReplaySum {
    fn add(&mut self, throughput: &[u64]) {
        match &mut self.values {
            None => self.values = Some(throughput.iter().map(|&x| u128::from(x)).collect()),
            Some(values) => {
                if throughput.len() < values.len() {
                    debug!(
                        "Truncating accumulated replays from {} to {} points",
                        values.len(),
                        throughput.len()
                    );
                    values.truncate(throughput.len());
                }
                for (sum, &x) in values.iter_mut().zip(throughput) {
                    *sum += u128::from(x);
                }
            }
        }
    }

    /// Every summed value divided by `replays`, floored
    fn average(&self, replays: usize) -> Vec<u64> {
        let divisor = replays.max(1) as u128;
        self.values
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|&sum| u64::try_from(sum / divisor).unwrap_or(u64::MAX))
            .collect()
    }
}

/// Outcome of one factor-level combination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationResult {
    pub levels: FactorLevels,
    /// Throughput statistics in bytes per second
    pub throughput: SampleStatistics,
    /// Distribution of every steady-state batch latency across all replays
    pub latency: Option<LatencySummary>,
    /// Number of replay-averaged throughput points the statistics cover
    pub points: usize,
    /// Replays whose warmup met the stability criterion
    pub converged_replays: usize,
}

/// Ordered like the experiment's combinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub pattern: AccessPattern,
    pub varying_factors: Vec<Factor>,
    pub results: Vec<CombinationResult>,
    pub elapsed: Duration,
}

impl ExperimentResult {
    /// `(mean, std)` throughput pair of every combination
    pub fn pairs(&self) -> Vec<(u64, u64)> {
        self.results
            .iter()
            .map(|result| (result.throughput.mean, result.throughput.std))
            .collect()
    }
}

/// A factorial storage experiment bound to a storage backend
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
    backend: IoBackend,
}

impl Experiment {
    pub fn new(config: ExperimentConfig, backend: IoBackend) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn backend(&self) -> &IoBackend {
        &self.backend
    }

    /// Run every trial sequentially in a shuffled order drawn from `rng`.
    ///
    /// The first failing trial aborts the experiment.
    pub fn run(&self, rng: &mut StdRng) -> Result<ExperimentResult> {
        let started = Instant::now();
        let combinations = &self.config.combinations;
        info!(
            "Starting experiment: {} combinations x {} replays on {} backend",
            combinations.len(),
            self.config.replays,
            self.backend
        );

        let order = generate_order(combinations.len(), self.config.replays, rng);
        debug!("Trial order: {:?}", order);

        let mut runners = combinations
            .iter()
            .enumerate()
            .map(|(index, levels)| {
                BenchmarkRunner::new(
                    self.config.benchmark_config(*levels),
                    self.backend.factory_for(index as u64),
                    StdRng::seed_from_u64(rng.gen()),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let mut sums = vec![ReplaySum::default(); combinations.len()];
        let mut collectors = combinations
            .iter()
            .map(|_| LatencyCollector::new())
            .collect::<Result<Vec<_>>>()?;
        let mut converged = vec![0usize; combinations.len()];

        for (trial, &index) in order.iter().enumerate() {
            let runner = &mut runners[index];
            let outcome = runner.run()?;

            let throughput = to_throughput(&outcome.latencies_us, runner.config().bytes_per_batch());
            sums[index].add(&throughput);
            collectors[index].record_all(&outcome.latencies_us);
            if outcome.warmup_converged {
                converged[index] += 1;
            }
            info!("Finished trial {}/{}", trial + 1, order.len());
        }

        let mut results = Vec::with_capacity(combinations.len());
        for (index, levels) in combinations.iter().enumerate() {
            let averaged = sums[index].average(self.config.replays);
            results.push(CombinationResult {
                levels: *levels,
                throughput: SampleStatistics::compute(&averaged)?,
                latency: collectors[index].summary(),
                points: averaged.len(),
                converged_replays: converged[index],
            });
        }

        Ok(ExperimentResult {
            pattern: self.config.pattern,
            varying_factors: self.config.varying_factors.clone(),
            results,
            elapsed: started.elapsed(),
        })
    }
}
