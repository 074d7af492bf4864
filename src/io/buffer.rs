//! Page-aligned I/O buffers.
//!
//! Direct I/O requires the user buffer address to be aligned to the logical
//! block size of the device. Every buffer handed to a [`StorageIo`] backend is
//! allocated at [`ALIGNMENT`] so the same buffers work with and without the
//! page cache.
//!
//! [`StorageIo`]: super::StorageIo

use crate::error::{BenchError, Result};
use rand::RngCore;
use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Alignment of every I/O buffer and of random offsets under direct I/O
pub const ALIGNMENT: usize = 4096;

/// Heap buffer aligned to [`ALIGNMENT`]
pub struct IoBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: IoBuffer uniquely owns its allocation, like a Box<[u8]>.
unsafe impl Send for IoBuffer {}
unsafe impl Sync for IoBuffer {}

impl IoBuffer {
    /// Allocate a zeroed buffer of `len` bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len.max(1), ALIGNMENT)
            .map_err(|_| BenchError::Allocation { size: len })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };

        Ok(Self { ptr, len, layout })
    }

    /// Allocate a buffer of `len` bytes filled from `rng`
    pub fn random(len: usize, rng: &mut impl RngCore) -> Result<Self> {
        let mut buffer = Self::zeroed(len)?;
        rng.fill_bytes(buffer.as_mut_slice());
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for len initialized bytes and uniquely borrowed.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Increment the leading 32-bit word so the next write carries new content.
    ///
    /// Buffers shorter than a word get their first byte bumped instead.
    pub fn perturb(&mut self) {
        let bytes = self.as_mut_slice();
        if bytes.len() >= 4 {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[..4]);
            let bumped = u32::from_ne_bytes(word).wrapping_add(1);
            bytes[..4].copy_from_slice(&bumped.to_ne_bytes());
        } else if let Some(first) = bytes.first_mut() {
            *first = first.wrapping_add(1);
        }
    }
}

impl Drop for IoBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBuffer").field("len", &self.len).finish()
    }
}
