//! # Storage I/O Abstraction
//!
//! The benchmark engine never calls the operating system directly. Every read
//! and write goes through the [`StorageIo`] trait, which has one real backend
//! ([`PosixIo`]) and three deterministic fakes used to test the warmup and
//! statistics logic without a physical device.
//!
//! All four operations share one contract: they take a batch of independent
//! requests plus one file offset per request, and return an [`IoOutcome`]
//! holding the bytes transferred and the **sum** of the per-call durations.
//! Building iovec arrays and other bookkeeping is never part of the measured
//! time.
//!
//! Backends are owned by an [`IoFactory`], an arena that hands out stable
//! [`IoHandle`]s. Each experiment combination gets its own factory so stateful
//! fakes never leak state between combinations.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::time::Duration;

pub mod buffer;
pub mod fake;
pub mod posix;

pub use buffer::IoBuffer;
pub use fake::{CyclingLatencyIo, FixedLatencyIo, RandomLatencyIo};
pub use posix::PosixIo;

/// Result of one timed batch operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoOutcome {
    /// Bytes reported by the backend (failed calls count 0)
    pub bytes: u64,
    /// Sum of the durations of the individual calls
    pub elapsed: Duration,
}

impl IoOutcome {
    /// Elapsed time truncated to whole microseconds
    pub fn elapsed_us(&self) -> u64 {
        u64::try_from(self.elapsed.as_micros()).unwrap_or(u64::MAX)
    }
}

/// Timed batch storage operations
///
/// `offsets[i]` is the file offset of request `i`. Positional operations take
/// one buffer per request; vectored operations take one group of contiguous
/// sub-buffers per request and issue it with a single call.
pub trait StorageIo {
    fn read(&mut self, file: &File, buffers: &mut [IoBuffer], offsets: &[u64]) -> IoOutcome;

    fn write(&mut self, file: &File, buffers: &[IoBuffer], offsets: &[u64]) -> IoOutcome;

    fn read_vectored(
        &mut self,
        file: &File,
        groups: &mut [Vec<IoBuffer>],
        offsets: &[u64],
    ) -> IoOutcome;

    fn write_vectored(
        &mut self,
        file: &File,
        groups: &[Vec<IoBuffer>],
        offsets: &[u64],
    ) -> IoOutcome;

    /// Backend name for logs and reports
    fn name(&self) -> &'static str;
}

/// Stable reference to an instance owned by an [`IoFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoHandle(usize);

impl IoHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

type Constructor = Box<dyn Fn() -> Box<dyn StorageIo>>;

/// Arena of storage I/O instances
///
/// Instances are never dropped or moved out while the factory lives, so a
/// handle stays valid however many instances are constructed after it.
pub struct IoFactory {
    constructor: Constructor,
    instances: Vec<Box<dyn StorageIo>>,
}

impl IoFactory {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> Box<dyn StorageIo> + 'static,
    {
        Self {
            constructor: Box::new(constructor),
            instances: Vec::new(),
        }
    }

    /// Construct one new instance and return its handle
    pub fn construct(&mut self) -> IoHandle {
        self.instances.push((self.constructor)());
        IoHandle(self.instances.len() - 1)
    }

    /// Construct `amount` new instances
    pub fn construct_many(&mut self, amount: usize) -> Vec<IoHandle> {
        (0..amount).map(|_| self.construct()).collect()
    }

    pub fn get_mut(&mut self, handle: IoHandle) -> crate::error::Result<&mut dyn StorageIo> {
        match self.instances.get_mut(handle.0) {
            Some(instance) => Ok(instance.as_mut()),
            None => Err(crate::error::BenchError::StaleHandle(handle.0)),
        }
    }

    /// Number of instances constructed so far
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Odd multiplier spreading stream indices across the seed space
const STREAM_SEED_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Recipe for the backend every combination's factory constructs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoBackend {
    /// Real operating system calls
    #[default]
    Posix,
    /// Every request costs `latency_us`
    FixedLatency { latency_us: u64 },
    /// Every request costs the next entry of `pool_us`, cycling
    CyclingLatency { pool_us: Vec<u64> },
    /// Every request costs a random entry of `pool_us`
    RandomLatency { pool_us: Vec<u64>, seed: u64 },
}

impl IoBackend {
    /// Build a fresh, empty factory for this backend
    pub fn factory(&self) -> IoFactory {
        self.factory_for(0)
    }

    /// Build a fresh factory whose random instances draw from stream `stream`.
    ///
    /// Distinct streams of the same random backend produce unrelated latency
    /// sequences. Stream 0 starts from the configured seed.
    pub fn factory_for(&self, stream: u64) -> IoFactory {
        match self.clone() {
            IoBackend::Posix => IoFactory::new(|| Box::new(PosixIo::new())),
            IoBackend::FixedLatency { latency_us } => {
                IoFactory::new(move || Box::new(FixedLatencyIo::new(latency_us)))
            }
            IoBackend::CyclingLatency { pool_us } => {
                IoFactory::new(move || Box::new(CyclingLatencyIo::new(pool_us.clone())))
            }
            IoBackend::RandomLatency { pool_us, seed } => {
                // Each instance gets its own stream, derived from the base seed.
                let next_seed = std::cell::Cell::new(seed ^ stream.wrapping_mul(STREAM_SEED_STRIDE));
                IoFactory::new(move || {
                    let instance_seed = next_seed.get();
                    next_seed.set(instance_seed.wrapping_add(1));
                    Box::new(RandomLatencyIo::seeded(pool_us.clone(), instance_seed))
                })
            }
        }
    }

    pub fn is_simulated(&self) -> bool {
        !matches!(self, IoBackend::Posix)
    }
}

impl std::fmt::Display for IoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoBackend::Posix => write!(f, "POSIX"),
            IoBackend::FixedLatency { latency_us } => write!(f, "Fixed latency ({}us)", latency_us),
            IoBackend::CyclingLatency { pool_us } => write!(f, "Cycling latency {:?}us", pool_us),
            IoBackend::RandomLatency { pool_us, .. } => write!(f, "Random latency {:?}us", pool_us),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file() -> (tempfile::TempDir, File) {
        let dir = tempfile::tempdir().unwrap();
        let file = File::create(dir.path().join("scratch")).unwrap();
        (dir, file)
    }

    #[test]
    fn test_handles_survive_growth() {
        let mut factory = IoBackend::CyclingLatency {
            pool_us: vec![20, 30, 40],
        }
        .factory();
        let (_dir, file) = scratch_file();
        let mut buffers = vec![IoBuffer::zeroed(16).unwrap()];

        let first = factory.construct();
        // Advance the first instance once: index 0 -> 1, latency 30.
        let outcome = factory.get_mut(first).unwrap().read(&file, &mut buffers, &[0]);
        assert_eq!(outcome.elapsed_us(), 30);

        let more = factory.construct_many(64);
        assert_eq!(more.len(), 64);
        assert_eq!(factory.len(), 65);

        // The first handle still refers to the same, already advanced instance.
        let outcome = factory.get_mut(first).unwrap().read(&file, &mut buffers, &[0]);
        assert_eq!(outcome.elapsed_us(), 40);

        // A fresh instance starts from the beginning of the pool.
        let outcome = factory.get_mut(more[0]).unwrap().read(&file, &mut buffers, &[0]);
        assert_eq!(outcome.elapsed_us(), 30);
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut small = IoBackend::FixedLatency { latency_us: 15 }.factory();
        let mut large = IoBackend::FixedLatency { latency_us: 15 }.factory();
        large.construct_many(3);
        let foreign = large.construct();

        assert!(small.is_empty());
        assert!(matches!(
            small.get_mut(foreign),
            Err(crate::error::BenchError::StaleHandle(3))
        ));
    }

    #[test]
    fn test_factories_do_not_share_state() {
        let backend = IoBackend::CyclingLatency {
            pool_us: vec![20, 30, 40],
        };
        let mut a = backend.factory();
        let mut b = backend.factory();
        let (_dir, file) = scratch_file();
        let mut buffers = vec![IoBuffer::zeroed(16).unwrap()];

        let ha = a.construct();
        let hb = b.construct();
        for _ in 0..2 {
            a.get_mut(ha).unwrap().read(&file, &mut buffers, &[0]);
        }
        let outcome = b.get_mut(hb).unwrap().read(&file, &mut buffers, &[0]);
        assert_eq!(outcome.elapsed_us(), 30);
    }

    #[test]
    fn test_random_streams_are_independent() {
        let backend = IoBackend::RandomLatency {
            pool_us: (0..1000).collect(),
            seed: 5,
        };
        let (_dir, file) = scratch_file();
        let mut buffers = vec![IoBuffer::zeroed(16).unwrap()];
        let mut draw = |mut factory: IoFactory| -> Vec<u64> {
            let handle = factory.construct();
            (0..32)
                .map(|_| factory.get_mut(handle).unwrap().read(&file, &mut buffers, &[0]).elapsed_us())
                .collect()
        };

        let first = draw(backend.factory_for(0));
        let second = draw(backend.factory_for(1));
        assert_ne!(first, second);
        assert_eq!(first, draw(backend.factory()));
        assert_eq!(second, draw(backend.factory_for(1)));
    }

    #[test]
    fn test_outcome_truncates_to_microseconds() {
        let outcome = IoOutcome {
            bytes: 0,
            elapsed: Duration::from_nanos(15_999),
        };
        assert_eq!(outcome.elapsed_us(), 15);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(IoBackend::Posix.to_string(), "POSIX");
        assert_eq!(
            IoBackend::FixedLatency { latency_us: 15 }.to_string(),
            "Fixed latency (15us)"
        );
        assert!(!IoBackend::Posix.is_simulated());
        assert!(IoBackend::FixedLatency { latency_us: 1 }.is_simulated());
    }
}
