//! # Benchmark Engine Module
//!
//! This module contains the engine that measures one point of factor space.
//! A [`BenchmarkRunner`] owns the configuration of that point and the
//! [`IoFactory`] its storage backends come from, and every call to
//! [`BenchmarkRunner::run`] walks the same state machine:
//!
//! 1. **Preparing**: remove and recreate the target file if requested, run the
//!    preparation command, open the file (optionally bypassing the page cache)
//!    and pre-fill it so every later read lands on initialized data
//! 2. **Warming up**: issue batches until the latency of the most recent
//!    batches stabilizes or the warmup budget runs out
//! 3. **Steady state**: discard the warmup samples, restart the clock and
//!    sample for the configured test duration
//! 4. **Done**: close the file and remove it if this run created it
//!
//! ## Measurement Model
//!
//! One sample is the summed latency of one batch of `batch_size` independent
//! requests. With a queue depth of one each request is a positional call;
//! otherwise each request is one vectored call over `queue_depth` contiguous
//! sub-buffers. After each batch every buffer gets one word changed so that
//! compression or deduplication below the file system cannot shortcut writes.

use crate::{
    config::{AccessPattern, EnvironmentSpec, FactorLevels, WarmupPolicy},
    error::{BenchError, Result},
    io::{buffer::ALIGNMENT, posix::open_target, IoBuffer, IoFactory, IoHandle, IoOutcome, StorageIo},
    metrics::SampleStatistics,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Size of one pre-fill sub-buffer
pub const FILL_CHUNK_SIZE: usize = 1024 * 1024;

/// Number of sub-buffers per pre-fill vectored write
pub const FILL_IOV_COUNT: usize = 8;

/// Seed of the pre-fill content, so every prepared file holds the same bytes
const FILL_SEED: u64 = 0x5eed_f11e;

/// Exclusive bound of each of the two draws composing a random offset
const RANDOM_DRAW_BOUND: u64 = 32768;

/// Configuration of one benchmarked point
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub pattern: AccessPattern,
    pub levels: FactorLevels,
    pub warmup: WarmupPolicy,
    pub environment: EnvironmentSpec,
    /// Steady-state sampling duration
    pub test_duration: Duration,
    /// Requests per measured batch
    pub batch_size: usize,
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BenchError::invalid("batch size cannot be zero"));
        }
        if self.test_duration.is_zero() {
            return Err(BenchError::invalid("test duration cannot be zero"));
        }
        self.warmup.validate()?;
        self.environment.validate()?;
        self.levels.validate(self.environment.filesize)
    }

    /// Bytes moved by one batch: `batch_size * request_size * queue_depth`
    pub fn bytes_per_batch(&self) -> u64 {
        (self.batch_size as u64).saturating_mul(self.levels.span())
    }
}

/// A helper struct to display the configuration of one runner
struct BenchmarkConfigDisplay<'a>(&'a BenchmarkConfig);

impl std::fmt::Display for BenchmarkConfigDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.0;
        write!(
            f,
            "{} {} | {} | batch {} | warmup <= {:?} (coef {}, window {}) | test {:?}",
            if config.pattern.consecutive { "sequential" } else { "random" },
            if config.pattern.is_read { "read" } else { "write" },
            config.levels,
            config.batch_size,
            config.warmup.max_duration,
            config.warmup.threshold_coef,
            config.warmup.sample_size,
            config.test_duration,
        )
    }
}

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Preparing,
    WarmingUp,
    SteadyState,
    Done,
}

/// Latencies of one run plus how its warmup ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Steady-state batch latencies in microseconds, oldest first
    pub latencies_us: Vec<u64>,
    /// Warmup stopped on the stability criterion rather than on its time budget
    pub warmup_converged: bool,
    pub warmup_batches: u64,
}

/// Offset selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPolicy {
    Sequential,
    Random,
}

/// File offsets of the requests of the current batch
#[derive(Debug)]
pub struct OffsetGenerator {
    policy: OffsetPolicy,
    span: u64,
    filesize: u64,
    /// Sequential offsets wrap modulo the largest multiple of `span` within the file.
    wrap: u64,
    stride: u64,
    alignment: u64,
    offsets: Vec<u64>,
    rng: StdRng,
}

impl OffsetGenerator {
    /// Create the generator and lay out the first batch.
    ///
    /// `levels` must have been validated against `filesize`.
    pub fn new(
        policy: OffsetPolicy,
        levels: &FactorLevels,
        filesize: u64,
        batch_size: usize,
        rng: StdRng,
    ) -> Self {
        let span = levels.span().max(1);
        let mut generator = Self {
            policy,
            span,
            filesize,
            wrap: (filesize / span).max(1) * span,
            stride: span.saturating_mul(batch_size as u64),
            alignment: if levels.direct_io { ALIGNMENT as u64 } else { 1 },
            offsets: vec![0; batch_size],
            rng,
        };

        match policy {
            OffsetPolicy::Sequential => {
                let wrap = u128::from(generator.wrap);
                for (slot, offset) in generator.offsets.iter_mut().enumerate() {
                    *offset = ((slot as u128 * u128::from(span)) % wrap) as u64;
                }
            }
            OffsetPolicy::Random => generator.redraw(),
        }
        generator
    }

    pub fn current(&self) -> &[u64] {
        &self.offsets
    }

    /// Move every slot to its offset in the next batch
    pub fn advance(&mut self) {
        match self.policy {
            OffsetPolicy::Sequential => {
                let wrap = u128::from(self.wrap);
                let stride = u128::from(self.stride);
                for offset in &mut self.offsets {
                    *offset = ((u128::from(*offset) + stride) % wrap) as u64;
                }
            }
            OffsetPolicy::Random => self.redraw(),
        }
    }

    fn redraw(&mut self) {
        for slot in 0..self.offsets.len() {
            self.offsets[slot] = self.random_offset();
        }
    }

    /// Product of two bounded draws reduced into `[0, filesize - span)`.
    ///
    /// The product is not uniform and tops out near 2^30; both are accepted.
    fn random_offset(&mut self) -> u64 {
        let limit = self.filesize - self.span;
        if limit == 0 {
            return 0;
        }
        let draw = self.rng.gen_range(0..RANDOM_DRAW_BOUND) * self.rng.gen_range(0..RANDOM_DRAW_BOUND);
        let offset = draw % limit;
        offset - offset % self.alignment
    }
}

/// Buffers of one batch, shaped by the queue depth
enum BatchBuffers {
    Positional(Vec<IoBuffer>),
    Vectored(Vec<Vec<IoBuffer>>),
}

impl BatchBuffers {
    fn allocate(levels: &FactorLevels, batch_size: usize, rng: &mut StdRng) -> Result<Self> {
        let request_size = usize::try_from(levels.request_size)
            .map_err(|_| BenchError::Allocation { size: usize::MAX })?;

        if levels.queue_depth == 1 {
            let buffers = (0..batch_size)
                .map(|_| IoBuffer::random(request_size, rng))
                .collect::<Result<Vec<_>>>()?;
            Ok(BatchBuffers::Positional(buffers))
        } else {
            let groups = (0..batch_size)
                .map(|_| {
                    (0..levels.queue_depth)
                        .map(|_| IoBuffer::random(request_size, rng))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(BatchBuffers::Vectored(groups))
        }
    }

    fn submit(&mut self, io: &mut dyn StorageIo, file: &File, offsets: &[u64], is_read: bool) -> IoOutcome {
        match (self, is_read) {
            (BatchBuffers::Positional(buffers), true) => io.read(file, buffers, offsets),
            (BatchBuffers::Positional(buffers), false) => io.write(file, buffers, offsets),
            (BatchBuffers::Vectored(groups), true) => io.read_vectored(file, groups, offsets),
            (BatchBuffers::Vectored(groups), false) => io.write_vectored(file, groups, offsets),
        }
    }

    fn perturb(&mut self) {
        match self {
            BatchBuffers::Positional(buffers) => buffers.iter_mut().for_each(IoBuffer::perturb),
            BatchBuffers::Vectored(groups) => groups
                .iter_mut()
                .flat_map(|group| group.iter_mut())
                .for_each(IoBuffer::perturb),
        }
    }
}

/// The file under test; closed, then removed if this run created it
struct TargetFile {
    file: Option<File>,
    path: PathBuf,
    remove_on_drop: bool,
}

impl TargetFile {
    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| BenchError::environment(&self.path, std::io::ErrorKind::NotFound.into()))
    }
}

impl Drop for TargetFile {
    fn drop(&mut self) {
        drop(self.file.take());
        if self.remove_on_drop {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Executes the benchmark of one factor-level point
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    factory: IoFactory,
    /// Instance that serves measured batches, reused across replays
    measuring: Option<IoHandle>,
    /// Instance that pre-fills the file
    preparing: Option<IoHandle>,
    rng: StdRng,
    phase: RunPhase,
}

impl BenchmarkRunner {
    /// Create a runner; the configuration is validated up front
    pub fn new(config: BenchmarkConfig, factory: IoFactory, rng: StdRng) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            measuring: None,
            preparing: None,
            rng,
            phase: RunPhase::Done,
        })
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Phase of the run in progress, `Done` between runs
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Run the benchmark once. Can be called any number of times.
    pub fn run(&mut self) -> Result<RunOutcome> {
        info!("Benchmark: {}", BenchmarkConfigDisplay(&self.config));

        self.phase = RunPhase::Preparing;
        let result = self.prepare().and_then(|target| {
            let outcome = self.measure(target.file()?);
            drop(target);
            outcome
        });
        self.phase = RunPhase::Done;

        if let Ok(outcome) = &result {
            debug!(
                "Run finished: {} steady-state samples after {} warmup batches (converged: {})",
                outcome.latencies_us.len(),
                outcome.warmup_batches,
                outcome.warmup_converged
            );
        }
        result
    }

    fn prepare(&mut self) -> Result<TargetFile> {
        let environment = &self.config.environment;
        let path = environment.filepath.as_path();

        if environment.unlink {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed existing {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BenchError::environment(path, e)),
            }
            if let Some(script) = &environment.preparation_script {
                run_preparation_script(script, path)?;
            }
        }

        let existed = path.exists();
        let file = open_target(path, self.config.levels.direct_io)
            .map_err(|e| BenchError::environment(path, e))?;
        let target = TargetFile {
            file: Some(file),
            path: path.to_path_buf(),
            remove_on_drop: !existed,
        };

        let current_len = target
            .file()?
            .metadata()
            .map_err(|e| BenchError::environment(path, e))?
            .len();
        if !existed || current_len < environment.filesize {
            self.fill(target.file()?)?;
        }

        Ok(target)
    }

    /// Pre-fill the file to its configured size with large vectored writes
    fn fill(&mut self, file: &File) -> Result<()> {
        let filesize = self.config.environment.filesize;
        let handle = *self
            .preparing
            .get_or_insert_with(|| self.factory.construct());

        let mut content = StdRng::seed_from_u64(FILL_SEED);
        let mut group = (0..FILL_IOV_COUNT)
            .map(|_| IoBuffer::random(FILL_CHUNK_SIZE, &mut content))
            .collect::<Result<Vec<_>>>()?;
        let stride = (FILL_IOV_COUNT * FILL_CHUNK_SIZE) as u64;

        let io = self.factory.get_mut(handle)?;
        let started = Instant::now();
        let mut written = 0u64;
        let mut offset = 0u64;
        while offset < filesize {
            written += io
                .write_vectored(file, std::slice::from_ref(&group), &[offset])
                .bytes;
            group.iter_mut().for_each(IoBuffer::perturb);
            offset += stride;
        }

        file.set_len(filesize)
            .map_err(|e| BenchError::environment(&self.config.environment.filepath, e))?;
        debug!(
            "Filled {} ({} bytes written by {}) in {:?}",
            self.config.environment.filepath.display(),
            written,
            io.name(),
            started.elapsed()
        );
        Ok(())
    }

    fn measure(&mut self, file: &File) -> Result<RunOutcome> {
        let handle = *self
            .measuring
            .get_or_insert_with(|| self.factory.construct());

        let config = &self.config;
        let policy = if config.pattern.consecutive {
            OffsetPolicy::Sequential
        } else {
            OffsetPolicy::Random
        };
        let mut buffers = BatchBuffers::allocate(&config.levels, config.batch_size, &mut self.rng)?;
        let mut offsets = OffsetGenerator::new(
            policy,
            &config.levels,
            config.environment.filesize,
            config.batch_size,
            StdRng::seed_from_u64(self.rng.gen()),
        );
        let io = self.factory.get_mut(handle)?;

        let mut window = WarmupWindow::new(config.warmup.sample_size);
        let mut samples: Vec<u64> = Vec::new();
        let mut warmup_batches = 0u64;
        let mut warmup_converged = false;
        let mut started = Instant::now();
        self.phase = RunPhase::WarmingUp;

        loop {
            let outcome = buffers.submit(io, file, offsets.current(), config.pattern.is_read);
            buffers.perturb();
            offsets.advance();

            if self.phase == RunPhase::WarmingUp {
                window.push(outcome.elapsed_us());
                warmup_batches += 1;
                if let Some(converged) = warmup_decision(window.as_slice(), &config.warmup, started.elapsed())? {
                    info!(
                        "Warmup finished after {} batches in {:?} (criterion met: {})",
                        warmup_batches,
                        started.elapsed(),
                        converged
                    );
                    warmup_converged = converged;
                    window.clear();
                    started = Instant::now();
                    self.phase = RunPhase::SteadyState;
                }
            } else {
                samples.push(outcome.elapsed_us());
                if started.elapsed() >= config.test_duration {
                    break;
                }
            }
        }

        Ok(RunOutcome {
            latencies_us: samples,
            warmup_converged,
            warmup_batches,
        })
    }
}

/// Most recent warmup latencies, capped at the stability window
#[derive(Debug)]
pub struct WarmupWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl WarmupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one latency, evicting the oldest once the window is full
    pub fn push(&mut self, latency_us: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_us);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Retained latencies, oldest first
    pub fn as_slice(&mut self) -> &[u64] {
        self.samples.make_contiguous()
    }
}

/// Decide whether warmup is over.
///
/// Returns `Some(true)` when the most recent `sample_size` latencies satisfy
/// `std <= threshold_coef * mean`, `Some(false)` when the time budget is spent
/// without that, and `None` to keep warming up.
pub fn warmup_decision(samples: &[u64], policy: &WarmupPolicy, elapsed: Duration) -> Result<Option<bool>> {
    if samples.len() >= policy.sample_size {
        let window = &samples[samples.len() - policy.sample_size..];
        if SampleStatistics::compute(window)?.is_stable(policy.threshold_coef) {
            return Ok(Some(true));
        }
    }
    if elapsed >= policy.max_duration {
        return Ok(Some(false));
    }
    Ok(None)
}

/// Run the external preparation command through the shell
fn run_preparation_script(script: &str, path: &Path) -> Result<()> {
    info!("Running preparation command: {}", script);
    let output = Command::new("sh")
        .arg("-c")
        .arg(script)
        .env("STORAGE_BENCHMARK_FILE", path)
        .output()
        .map_err(|e| BenchError::environment(path, e))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("[prepare] {}", line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        debug!("[prepare] {}", line);
    }

    if !output.status.success() {
        return Err(BenchError::environment(
            path,
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("preparation command `{}` failed: {}", script, output.status),
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IoBackend;

    const MIB: u64 = 1024 * 1024;

    fn test_config(dir: &Path, batch_size: usize) -> BenchmarkConfig {
        BenchmarkConfig {
            pattern: AccessPattern {
                consecutive: true,
                is_read: true,
            },
            levels: FactorLevels {
                request_size: 1024,
                queue_depth: 1,
                direct_io: false,
            },
            warmup: WarmupPolicy {
                threshold_coef: 0.15,
                max_duration: Duration::from_millis(20),
                sample_size: 100,
            },
            environment: EnvironmentSpec {
                filepath: dir.join("testfile"),
                filesize: MIB,
                unlink: true,
                preparation_script: None,
            },
            test_duration: Duration::from_millis(20),
            batch_size,
        }
    }

    fn runner(config: BenchmarkConfig, backend: IoBackend) -> BenchmarkRunner {
        BenchmarkRunner::new(config, backend.factory(), StdRng::seed_from_u64(1)).unwrap()
    }

    fn levels(request_size: u64, queue_depth: u64) -> FactorLevels {
        FactorLevels {
            request_size,
            queue_depth,
            direct_io: false,
        }
    }

    #[test]
    fn test_fixed_latency_single_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(test_config(dir.path(), 1), IoBackend::FixedLatency { latency_us: 15 });

        let outcome = runner.run().unwrap();
        assert!(!outcome.latencies_us.is_empty());
        assert!(outcome.latencies_us.iter().all(|&latency| latency == 15));
        assert!(outcome.warmup_converged);
        assert_eq!(outcome.warmup_batches, 100);
        assert_eq!(runner.phase(), RunPhase::Done);
    }

    #[test]
    fn test_fixed_latency_batch_of_five() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(test_config(dir.path(), 5), IoBackend::FixedLatency { latency_us: 15 });

        let outcome = runner.run().unwrap();
        assert!(outcome.latencies_us.iter().all(|&latency| latency == 75));
        let stats = SampleStatistics::compute(&outcome.latencies_us).unwrap();
        assert_eq!(stats, SampleStatistics { mean: 75, std: 0 });
    }

    #[test]
    fn test_fixed_latency_is_independent_of_queue_depth() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 5);
        config.levels = levels(1024, 8);
        config.pattern.is_read = false;
        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });

        let outcome = runner.run().unwrap();
        assert!(outcome.latencies_us.iter().all(|&latency| latency == 75));
    }

    #[test]
    fn test_cycling_latency_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(
            test_config(dir.path(), 1),
            IoBackend::CyclingLatency {
                pool_us: vec![20, 30, 40],
            },
        );

        let outcome = runner.run().unwrap();
        // The window std (about 8) never drops below 0.15 * 30, so warmup times out.
        assert!(!outcome.warmup_converged);
        let stats = SampleStatistics::compute(&outcome.latencies_us).unwrap();
        assert!((29..=30).contains(&stats.mean), "mean {}", stats.mean);
        assert!((8..=9).contains(&stats.std), "std {}", stats.std);
    }

    #[test]
    fn test_warmup_terminates_without_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.warmup.threshold_coef = 0.0;
        config.warmup.max_duration = Duration::from_millis(50);
        config.test_duration = Duration::from_millis(10);
        let mut runner = runner(
            config,
            IoBackend::CyclingLatency {
                pool_us: vec![20, 30, 40],
            },
        );

        let started = Instant::now();
        let outcome = runner.run().unwrap();
        let elapsed = started.elapsed();

        assert!(!outcome.warmup_converged);
        assert!(!outcome.latencies_us.is_empty());
        assert!(elapsed >= Duration::from_millis(60), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "elapsed {:?}", elapsed);
    }

    #[test]
    fn test_warmup_window_keeps_most_recent() {
        let mut window = WarmupWindow::new(100);
        for latency in 0..10_000u64 {
            window.push(latency);
            assert!(window.len() <= 100);
        }
        assert_eq!(window.len(), 100);
        let expected: Vec<u64> = (9_900..10_000).collect();
        assert_eq!(window.as_slice(), expected.as_slice());

        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn test_warmup_window_drives_decision() {
        let policy = WarmupPolicy {
            threshold_coef: 0.15,
            max_duration: Duration::from_secs(60),
            sample_size: 4,
        };
        let mut window = WarmupWindow::new(policy.sample_size);
        for latency in [1u64, 1000, 5, 900, 100, 100, 100, 100] {
            window.push(latency);
        }
        assert_eq!(window.len(), 4);
        assert_eq!(
            warmup_decision(window.as_slice(), &policy, Duration::ZERO).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_warmup_decision() {
        let policy = WarmupPolicy {
            threshold_coef: 0.1,
            max_duration: Duration::from_millis(100),
            sample_size: 3,
        };
        let short = Duration::from_millis(1);
        let long = Duration::from_millis(100);

        // Not enough samples yet.
        assert_eq!(warmup_decision(&[10, 10], &policy, short).unwrap(), None);
        // Only the most recent window counts.
        assert_eq!(warmup_decision(&[500, 10, 10, 10], &policy, short).unwrap(), Some(true));
        assert_eq!(warmup_decision(&[10, 10, 500], &policy, short).unwrap(), None);
        // The time budget ends warmup regardless of the window.
        assert_eq!(warmup_decision(&[10, 10, 500], &policy, long).unwrap(), Some(false));
        assert_eq!(warmup_decision(&[10], &policy, long).unwrap(), Some(false));
    }

    #[test]
    fn test_fake_state_persists_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(
            test_config(dir.path(), 1),
            IoBackend::CyclingLatency {
                pool_us: vec![20, 30, 40],
            },
        );

        runner.run().unwrap();
        runner.run().unwrap();
        // One measuring and one preparing instance, both reused by the second run.
        assert_eq!(runner.factory.len(), 2);
    }

    #[test]
    fn test_created_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 1);
        let path = config.environment.filepath.clone();
        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });

        runner.run().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_existing_file_is_kept_without_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.environment.unlink = false;
        let path = config.environment.filepath.clone();
        std::fs::write(&path, vec![7u8; MIB as usize]).unwrap();

        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });
        runner.run().unwrap();

        assert!(path.exists());
        // Already large enough: not refilled.
        assert!(std::fs::read(&path).unwrap().iter().all(|&b| b == 7));
    }

    #[test]
    fn test_short_existing_file_is_filled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.environment.unlink = false;
        let path = config.environment.filepath.clone();
        std::fs::write(&path, b"short").unwrap();

        let mut runner = runner(config, IoBackend::Posix);
        runner.run().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), MIB);
    }

    #[test]
    fn test_unopenable_file_is_environment_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.environment.filepath = dir.path().join("missing").join("testfile");
        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });

        assert!(matches!(runner.run(), Err(BenchError::Environment { .. })));
        assert_eq!(runner.phase(), RunPhase::Done);
    }

    #[test]
    fn test_preparation_script_runs_before_fill() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("prepared");
        let mut config = test_config(dir.path(), 1);
        config.environment.preparation_script = Some(format!("touch '{}'", marker.display()));
        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });

        runner.run().unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_failing_preparation_script_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 1);
        config.environment.preparation_script = Some("exit 3".to_string());
        let mut runner = runner(config, IoBackend::FixedLatency { latency_us: 15 });

        assert!(matches!(runner.run(), Err(BenchError::Environment { .. })));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 0);
        assert!(BenchmarkRunner::new(config.clone(), IoBackend::Posix.factory(), StdRng::seed_from_u64(0)).is_err());

        config.batch_size = 1;
        config.levels = levels(MIB, 2);
        assert!(BenchmarkRunner::new(config, IoBackend::Posix.factory(), StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_sequential_offsets_layout() {
        let generator = OffsetGenerator::new(
            OffsetPolicy::Sequential,
            &levels(100, 2),
            10_000,
            4,
            StdRng::seed_from_u64(0),
        );
        assert_eq!(generator.current(), &[0, 200, 400, 600]);

        let mut generator = generator;
        generator.advance();
        assert_eq!(generator.current(), &[800, 1000, 1200, 1400]);
    }

    #[test]
    fn test_sequential_offsets_stay_in_bounds() {
        for (filesize, request_size, queue_depth, batch) in
            [(10_000u64, 100u64, 2u64, 4usize), (1000, 300, 1, 3), (4096, 4096, 1, 5), (1 << 20, 4096, 8, 7), (999, 10, 3, 1)]
        {
            let span = request_size * queue_depth;
            let mut generator = OffsetGenerator::new(
                OffsetPolicy::Sequential,
                &levels(request_size, queue_depth),
                filesize,
                batch,
                StdRng::seed_from_u64(0),
            );
            for _ in 0..1000 {
                for &offset in generator.current() {
                    assert!(offset <= filesize - span, "offset {} span {} file {}", offset, span, filesize);
                    assert_eq!(offset % span, 0);
                }
                generator.advance();
            }
        }
    }

    #[test]
    fn test_sequential_offsets_wrap_at_boundary() {
        // Ten spans fit exactly: the single slot walks 0..=9 spans, then wraps to 0.
        let mut generator = OffsetGenerator::new(
            OffsetPolicy::Sequential,
            &levels(100, 1),
            1000,
            1,
            StdRng::seed_from_u64(0),
        );
        let walked: Vec<u64> = (0..11)
            .map(|_| {
                let offset = generator.current()[0];
                generator.advance();
                offset
            })
            .collect();
        assert_eq!(walked, vec![0, 100, 200, 300, 400, 500, 600, 700, 800, 900, 0]);

        // A partial trailing span is never used.
        let mut generator = OffsetGenerator::new(
            OffsetPolicy::Sequential,
            &levels(300, 1),
            1000,
            1,
            StdRng::seed_from_u64(0),
        );
        let walked: Vec<u64> = (0..4)
            .map(|_| {
                let offset = generator.current()[0];
                generator.advance();
                offset
            })
            .collect();
        assert_eq!(walked, vec![0, 300, 600, 0]);
    }

    #[test]
    fn test_random_offsets_stay_in_range() {
        let filesize = 64 * MIB;
        let mut generator = OffsetGenerator::new(
            OffsetPolicy::Random,
            &levels(4096, 4),
            filesize,
            8,
            StdRng::seed_from_u64(3),
        );
        let mut distinct = std::collections::HashSet::new();
        for _ in 0..500 {
            for &offset in generator.current() {
                assert!(offset < filesize - 4096 * 4);
                distinct.insert(offset);
            }
            generator.advance();
        }
        assert!(distinct.len() > 100);
    }

    #[test]
    fn test_random_offsets_align_for_direct_io() {
        let mut generator = OffsetGenerator::new(
            OffsetPolicy::Random,
            &FactorLevels {
                request_size: 4096,
                queue_depth: 1,
                direct_io: true,
            },
            16 * MIB,
            4,
            StdRng::seed_from_u64(5),
        );
        for _ in 0..200 {
            assert!(generator.current().iter().all(|offset| offset % ALIGNMENT as u64 == 0));
            generator.advance();
        }
    }

    #[test]
    fn test_random_offsets_when_span_fills_file() {
        let generator = OffsetGenerator::new(
            OffsetPolicy::Random,
            &levels(1024, 1),
            1024,
            3,
            StdRng::seed_from_u64(0),
        );
        assert_eq!(generator.current(), &[0, 0, 0]);
    }
}
