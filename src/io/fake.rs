//! Deterministic fake backends.
//!
//! The fakes never touch the file. Each request in a batch "costs" a latency
//! taken from a model, and the batch reports the sum. They make the warmup and
//! statistics paths testable with exact, analytically known expectations.

use super::{IoBuffer, IoOutcome, StorageIo};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::fs::File;
use std::time::Duration;

/// Every request costs the same latency
#[derive(Debug, Clone)]
pub struct FixedLatencyIo {
    latency_us: u64,
}

impl FixedLatencyIo {
    pub fn new(latency_us: u64) -> Self {
        Self { latency_us }
    }

    fn next_latency(&mut self) -> u64 {
        self.latency_us
    }
}

impl Default for FixedLatencyIo {
    fn default() -> Self {
        Self::new(crate::defaults::FIXED_LATENCY_US)
    }
}

/// Every request advances a cursor over a fixed pool and costs the entry it lands on
#[derive(Debug, Clone)]
pub struct CyclingLatencyIo {
    pool_us: Vec<u64>,
    index: usize,
}

impl CyclingLatencyIo {
    /// An empty pool behaves like a pool holding a single zero latency.
    pub fn new(pool_us: Vec<u64>) -> Self {
        Self {
            pool_us: non_empty(pool_us),
            index: 0,
        }
    }

    fn next_latency(&mut self) -> u64 {
        self.index = (self.index + 1) % self.pool_us.len();
        self.pool_us[self.index]
    }
}

impl Default for CyclingLatencyIo {
    fn default() -> Self {
        Self::new(crate::defaults::CYCLING_POOL_US.to_vec())
    }
}

/// Every request costs a uniformly chosen entry of a fixed pool
#[derive(Debug, Clone)]
pub struct RandomLatencyIo {
    pool_us: Vec<u64>,
    rng: StdRng,
}

impl RandomLatencyIo {
    pub fn new(pool_us: Vec<u64>, rng: StdRng) -> Self {
        Self {
            pool_us: non_empty(pool_us),
            rng,
        }
    }

    pub fn seeded(pool_us: Vec<u64>, seed: u64) -> Self {
        Self::new(pool_us, StdRng::seed_from_u64(seed))
    }

    fn next_latency(&mut self) -> u64 {
        let index = self.rng.gen_range(0..self.pool_us.len());
        self.pool_us[index]
    }
}

fn non_empty(mut pool_us: Vec<u64>) -> Vec<u64> {
    if pool_us.is_empty() {
        pool_us.push(0);
    }
    pool_us
}

fn group_len(group: &[IoBuffer]) -> u64 {
    group.iter().map(|buffer| buffer.len() as u64).sum()
}

/// Implements [`StorageIo`] for a fake that exposes `next_latency(&mut self) -> u64`.
macro_rules! simulated_storage_io {
    ($fake:ty, $name:literal) => {
        impl $fake {
            fn serve<I: Iterator<Item = u64>>(&mut self, request_bytes: I) -> IoOutcome {
                let mut outcome = IoOutcome::default();
                for bytes in request_bytes {
                    outcome.bytes += bytes;
                    outcome.elapsed += Duration::from_micros(self.next_latency());
                }
                outcome
            }
        }

        impl StorageIo for $fake {
            fn read(&mut self, _file: &File, buffers: &mut [IoBuffer], offsets: &[u64]) -> IoOutcome {
                self.serve(buffers.iter().zip(offsets).map(|(b, _)| b.len() as u64))
            }

            fn write(&mut self, _file: &File, buffers: &[IoBuffer], offsets: &[u64]) -> IoOutcome {
                self.serve(buffers.iter().zip(offsets).map(|(b, _)| b.len() as u64))
            }

            fn read_vectored(
                &mut self,
                _file: &File,
                groups: &mut [Vec<IoBuffer>],
                offsets: &[u64],
            ) -> IoOutcome {
                self.serve(groups.iter().zip(offsets).map(|(g, _)| group_len(g)))
            }

            fn write_vectored(
                &mut self,
                _file: &File,
                groups: &[Vec<IoBuffer>],
                offsets: &[u64],
            ) -> IoOutcome {
                self.serve(groups.iter().zip(offsets).map(|(g, _)| group_len(g)))
            }

            fn name(&self) -> &'static str {
                $name
            }
        }
    };
}

simulated_storage_io!(FixedLatencyIo, "fixed-latency");
simulated_storage_io!(CyclingLatencyIo, "cycling-latency");
simulated_storage_io!(RandomLatencyIo, "random-latency");

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::NamedTempFile, Vec<IoBuffer>, Vec<Vec<IoBuffer>>) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let buffers = (0..5).map(|_| IoBuffer::zeroed(1024).unwrap()).collect();
        let groups = (0..5)
            .map(|_| (0..4).map(|_| IoBuffer::zeroed(1024).unwrap()).collect())
            .collect();
        (file, buffers, groups)
    }

    #[test]
    fn test_fixed_latency_sums_per_request() {
        let (file, mut buffers, groups) = fixture();
        let offsets = [0u64; 5];
        let mut io = FixedLatencyIo::default();

        let outcome = io.read(file.as_file(), &mut buffers, &offsets);
        assert_eq!(outcome.elapsed_us(), 75);
        assert_eq!(outcome.bytes, 5 * 1024);

        let outcome = io.write_vectored(file.as_file(), &groups, &offsets);
        assert_eq!(outcome.elapsed_us(), 75);
        assert_eq!(outcome.bytes, 5 * 4 * 1024);

        // Only as many requests as offsets are served.
        let outcome = io.write(file.as_file(), &buffers, &offsets[..1]);
        assert_eq!(outcome.elapsed_us(), 15);
    }

    #[test]
    fn test_cycling_latency_walks_the_pool() {
        let (file, mut buffers, _) = fixture();
        let mut io = CyclingLatencyIo::default();

        let observed: Vec<u64> = (0..6)
            .map(|_| io.read(file.as_file(), &mut buffers[..1], &[0]).elapsed_us())
            .collect();
        assert_eq!(observed, vec![30, 40, 20, 30, 40, 20]);

        // A batch of three requests covers the whole pool.
        let outcome = io.read(file.as_file(), &mut buffers[..3], &[0, 0, 0]);
        assert_eq!(outcome.elapsed_us(), 90);
    }

    #[test]
    fn test_random_latency_draws_from_pool() {
        let (file, mut buffers, _) = fixture();
        let mut io = RandomLatencyIo::seeded(vec![10, 20, 60], 42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let latency = io.read(file.as_file(), &mut buffers[..1], &[0]).elapsed_us();
            assert!([10, 20, 60].contains(&latency));
            seen.insert(latency);
        }
        assert_eq!(seen.len(), 3);

        let mut a = RandomLatencyIo::seeded(vec![10, 20, 60], 9);
        let mut b = RandomLatencyIo::seeded(vec![10, 20, 60], 9);
        for _ in 0..20 {
            assert_eq!(
                a.read(file.as_file(), &mut buffers, &[0; 5]),
                b.read(file.as_file(), &mut buffers, &[0; 5])
            );
        }
    }

    #[test]
    fn test_empty_pool_costs_nothing() {
        let (file, mut buffers, _) = fixture();
        let mut io = CyclingLatencyIo::new(Vec::new());
        assert_eq!(io.read(file.as_file(), &mut buffers, &[0; 5]).elapsed_us(), 0);
        assert_eq!(io.name(), "cycling-latency");
    }
}
