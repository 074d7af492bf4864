//! Operating-system backend.
//!
//! Positional requests map to `pread`/`pwrite`, vectored requests to
//! `preadv`/`pwritev` on Linux and to `lseek` followed by `readv`/`writev`
//! elsewhere. Only the system call itself is inside the timed region.

use super::{IoBuffer, IoOutcome, StorageIo};
use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Storage I/O through real system calls
#[derive(Debug, Default)]
pub struct PosixIo {
    failed_calls: u64,
}

impl PosixIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls that returned an error so far
    pub fn failed_calls(&self) -> u64 {
        self.failed_calls
    }

    /// Fold one call result into the running outcome.
    ///
    /// Failed calls contribute no bytes; the device is assumed healthy, so
    /// failures are reported but never retried.
    fn account(&mut self, outcome: &mut IoOutcome, result: io::Result<usize>, elapsed: Duration) {
        outcome.elapsed += elapsed;
        match result {
            Ok(bytes) => outcome.bytes += bytes as u64,
            Err(e) => {
                self.failed_calls += 1;
                if self.failed_calls == 1 {
                    warn!("Storage call failed (further failures logged at trace): {}", e);
                } else {
                    trace!("Storage call failed: {}", e);
                }
            }
        }
    }
}

impl StorageIo for PosixIo {
    fn read(&mut self, file: &File, buffers: &mut [IoBuffer], offsets: &[u64]) -> IoOutcome {
        let mut outcome = IoOutcome::default();
        for (buffer, &offset) in buffers.iter_mut().zip(offsets) {
            let bytes = buffer.as_mut_slice();
            let start = Instant::now();
            let result = file.read_at(bytes, offset);
            let elapsed = start.elapsed();
            self.account(&mut outcome, result, elapsed);
        }
        outcome
    }

    fn write(&mut self, file: &File, buffers: &[IoBuffer], offsets: &[u64]) -> IoOutcome {
        let mut outcome = IoOutcome::default();
        for (buffer, &offset) in buffers.iter().zip(offsets) {
            let bytes = buffer.as_slice();
            let start = Instant::now();
            let result = file.write_at(bytes, offset);
            let elapsed = start.elapsed();
            self.account(&mut outcome, result, elapsed);
        }
        outcome
    }

    fn read_vectored(
        &mut self,
        file: &File,
        groups: &mut [Vec<IoBuffer>],
        offsets: &[u64],
    ) -> IoOutcome {
        let mut outcome = IoOutcome::default();
        for (group, &offset) in groups.iter_mut().zip(offsets) {
            let mut slices: Vec<IoSliceMut<'_>> = group
                .iter_mut()
                .map(|buffer| IoSliceMut::new(buffer.as_mut_slice()))
                .collect();
            let start = Instant::now();
            let result = preadv(file, &mut slices, offset);
            let elapsed = start.elapsed();
            self.account(&mut outcome, result, elapsed);
        }
        outcome
    }

    fn write_vectored(
        &mut self,
        file: &File,
        groups: &[Vec<IoBuffer>],
        offsets: &[u64],
    ) -> IoOutcome {
        let mut outcome = IoOutcome::default();
        for (group, &offset) in groups.iter().zip(offsets) {
            let slices: Vec<IoSlice<'_>> = group
                .iter()
                .map(|buffer| IoSlice::new(buffer.as_slice()))
                .collect();
            let start = Instant::now();
            let result = pwritev(file, &slices, offset);
            let elapsed = start.elapsed();
            self.account(&mut outcome, result, elapsed);
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "posix"
    }
}

#[cfg(target_os = "linux")]
fn preadv(file: &File, slices: &mut [IoSliceMut<'_>], offset: u64) -> io::Result<usize> {
    let offset = to_off_t(offset)?;
    nix::sys::uio::preadv(file, slices, offset).map_err(io::Error::from)
}

#[cfg(target_os = "linux")]
fn pwritev(file: &File, slices: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    let offset = to_off_t(offset)?;
    nix::sys::uio::pwritev(file, slices, offset).map_err(io::Error::from)
}

#[cfg(target_os = "linux")]
fn to_off_t(offset: u64) -> io::Result<libc::off_t> {
    libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))
}

#[cfg(not(target_os = "linux"))]
fn preadv(file: &File, slices: &mut [IoSliceMut<'_>], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    file.read_vectored(slices)
}

#[cfg(not(target_os = "linux"))]
fn pwritev(file: &File, slices: &[IoSlice<'_>], offset: u64) -> io::Result<usize> {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    file.write_vectored(slices)
}

/// Open (creating if needed) the file under test for reading and writing.
///
/// With `direct_io` the page cache is bypassed where the platform allows it:
/// `O_DIRECT` on Linux, `F_NOCACHE` on macOS. Other platforms fall back to
/// cached I/O with a warning.
pub fn open_target(path: &Path, direct_io: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).mode(0o700);

    #[cfg(target_os = "linux")]
    if direct_io {
        options.custom_flags(libc::O_DIRECT);
    }

    let file = options.open(path)?;

    #[cfg(target_os = "macos")]
    if direct_io {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and open.
        if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    if direct_io {
        warn!("Direct I/O is not supported on this platform; using cached I/O");
    }

    Ok(file)
}
