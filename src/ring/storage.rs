// src/ring/storage.rs
//! Backing storage and cursor arithmetic for the ring buffer
//!
//! This layer knows nothing about locks or waiting. [`Cursors`] holds the
//! read/write positions and the full flag, [`Slab`] holds the bytes. The
//! synchronization layer owns a `Cursors` behind its mutex and the `Slab`
//! next to it, so the transfer engine can hand a segment of the slab to an
//! external reader/writer while the mutex is released.
//!
//! # Memory Safety
//!
//! Every byte access goes through a raw pointer into the slab's cells, never
//! through a reference to the whole allocation. Cursor methods only touch
//! the occupied region (reads) or the free region (writes), and the two
//! lock-released segments are fenced off by flags:
//!
//! - while a fill segment is out, writers see the buffer as full
//! - while a drain segment is out, readers see the buffer as empty and
//!   overwrite eviction is suspended
//!
//! so a lock-released segment never overlaps anything a lock holder touches.

use crate::error::{Result, RingError};
use std::cell::UnsafeCell;
use zeroize::Zeroize;

/// Fixed-size byte storage shared between lock holders and transfer segments.
///
/// Memory is securely zeroed on drop.
pub(crate) struct Slab {
    cells: Box<[UnsafeCell<u8>]>,
}

// SAFETY: all access to the cells is coordinated by `Cursors` under the
// buffer's mutex, which keeps concurrently used ranges disjoint.
unsafe impl Sync for Slab {}

impl Slab {
    /// Takes ownership of `data` as the backing storage.
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let raw = Box::into_raw(data.into_boxed_slice()) as *mut [UnsafeCell<u8>];
        // SAFETY: UnsafeCell<u8> has the same layout as u8.
        let cells = unsafe { Box::from_raw(raw) };
        Self { cells }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline(always)]
    fn ptr(&self, start: usize) -> *mut u8 {
        debug_assert!(start <= self.len());
        // SAFETY: `start` is at most one past the end of the allocation.
        UnsafeCell::raw_get(unsafe { self.cells.as_ptr().add(start) })
    }

    /// Returns a shared view of `start..start + len`.
    ///
    /// # Safety
    ///
    /// Nobody may write to the range while the slice is alive.
    #[inline]
    pub(crate) unsafe fn slice(&self, start: usize, len: usize) -> &[u8] {
        debug_assert!(start + len <= self.len());
        unsafe { std::slice::from_raw_parts(self.ptr(start), len) }
    }

    /// Returns an exclusive view of `start..start + len`.
    ///
    /// # Safety
    ///
    /// Nobody else may read or write the range while the slice is alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [u8] {
        debug_assert!(start + len <= self.len());
        unsafe { std::slice::from_raw_parts_mut(self.ptr(start), len) }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        let len = self.cells.len();
        // SAFETY: `&mut self` rules out any outstanding segment.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.cells.as_mut_ptr().cast::<u8>(), len) };
        bytes.zeroize();
    }
}

/// A contiguous region of the slab lent out while the lock is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) start: usize,
    pub(crate) len: usize,
}

/// Read/write cursors with full-flag disambiguation.
///
/// `r == w` means empty unless `full` is set.
#[derive(Debug)]
pub(crate) struct Cursors {
    size: usize,
    r: usize,
    w: usize,
    full: bool,
    /// Whether size is power-of-2 (enables fast modulo)
    is_pow2: bool,
    filling: bool,
    draining: bool,
}

impl Cursors {
    pub(crate) fn new(size: usize) -> Self {
        debug_assert!(size > 0);
        Self {
            size,
            r: 0,
            w: 0,
            full: false,
            is_pow2: size.is_power_of_two(),
            filling: false,
            draining: false,
        }
    }

    /// Number of unread bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        if self.w == self.r {
            if self.full { self.size } else { 0 }
        } else if self.w > self.r {
            self.w - self.r
        } else {
            self.size - self.r + self.w
        }
    }

    /// Number of bytes that can be written without evicting.
    #[inline]
    pub(crate) fn free(&self) -> usize {
        self.size - self.len()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        !self.full && self.w == self.r
    }

    #[inline(always)]
    pub(crate) fn is_full(&self) -> bool {
        self.full
    }

    /// Whether a transfer segment is currently lent out.
    #[inline]
    pub(crate) fn is_transferring(&self) -> bool {
        self.filling || self.draining
    }

    /// Rewinds to the initial empty state.
    pub(crate) fn rewind(&mut self) {
        debug_assert!(!self.is_transferring());
        self.r = 0;
        self.w = 0;
        self.full = false;
    }

    /// Wraps a position around the buffer size.
    ///
    /// Uses fast bitwise AND for power-of-2 sizes, standard modulo otherwise.
    #[inline(always)]
    fn wrap_pos(&self, pos: usize, delta: usize) -> usize {
        let new_pos = pos + delta;
        if self.is_pow2 {
            new_pos & (self.size - 1)
        } else {
            new_pos % self.size
        }
    }

    /// Copies `dst.len()` bytes starting at `at`, wrapping once if needed.
    fn copy_out(&self, slab: &Slab, at: usize, dst: &mut [u8]) {
        let n = dst.len();
        let first = n.min(self.size - at);
        // SAFETY: the copied range lies in the occupied region, which no
        // lock-released fill segment overlaps.
        unsafe {
            dst[..first].copy_from_slice(slab.slice(at, first));
            if first < n {
                dst[first..].copy_from_slice(slab.slice(0, n - first));
            }
        }
    }

    /// Copies `src` into the slab starting at `at`, wrapping once if needed.
    fn copy_in(&self, slab: &Slab, at: usize, src: &[u8]) {
        let n = src.len();
        let first = n.min(self.size - at);
        // SAFETY: the target range lies in the free region (possibly grown
        // by eviction), which no lock-released segment overlaps: `filling`
        // blocks all writers and `draining` blocks eviction.
        unsafe {
            slab.slice_mut(at, first).copy_from_slice(&src[..first]);
            if first < n {
                slab.slice_mut(0, n - first).copy_from_slice(&src[first..]);
            }
        }
    }

    /// Consumes up to `dst.len()` bytes.
    pub(crate) fn read(&mut self, slab: &Slab, dst: &mut [u8]) -> Result<usize> {
        if self.draining || self.is_empty() {
            return Err(RingError::Empty);
        }
        let n = self.len().min(dst.len());
        if n == 0 {
            return Ok(0);
        }
        self.copy_out(slab, self.r, &mut dst[..n]);
        self.r = self.wrap_pos(self.r, n);
        self.full = false;
        Ok(n)
    }

    /// Copies up to `dst.len()` bytes without consuming them.
    pub(crate) fn peek(&self, slab: &Slab, dst: &mut [u8]) -> Result<usize> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let n = self.len().min(dst.len());
        self.copy_out(slab, self.r, &mut dst[..n]);
        Ok(n)
    }

    /// Appends every unread byte to `dst` without consuming them.
    pub(crate) fn copy_all(&self, slab: &Slab, dst: &mut Vec<u8>) {
        let n = self.len();
        let start = dst.len();
        dst.resize(start + n, 0);
        self.copy_out(slab, self.r, &mut dst[start..]);
    }

    /// Stores as much of `src` as fits.
    ///
    /// In overwrite mode the oldest bytes are evicted instead and the whole
    /// payload length is reported; only the last `capacity` bytes of an
    /// oversized payload are kept.
    pub(crate) fn write(&mut self, slab: &Slab, src: &[u8], overwrite: bool) -> Result<usize> {
        if self.filling {
            return Err(RingError::Full);
        }
        if overwrite && !self.draining {
            return Ok(self.overwrite(slab, src));
        }
        if self.full {
            return Err(RingError::Full);
        }

        let avail = self.free();
        let n = src.len().min(avail);
        self.copy_in(slab, self.w, &src[..n]);
        self.w = self.wrap_pos(self.w, n);
        if n > 0 && self.w == self.r {
            self.full = true;
        }

        if src.len() > avail {
            Err(RingError::TooMuchDataToWrite { written: n })
        } else {
            Ok(n)
        }
    }

    fn overwrite(&mut self, slab: &Slab, src: &[u8]) -> usize {
        let total = src.len();
        let kept = if total > self.size {
            &src[total - self.size..]
        } else {
            src
        };
        if kept.is_empty() {
            return 0;
        }

        let free = self.free();
        if kept.len() > free {
            self.evict(kept.len() - free);
        }
        self.copy_in(slab, self.w, kept);
        self.w = self.wrap_pos(self.w, kept.len());
        if self.w == self.r {
            self.full = true;
        }
        total
    }

    /// Discards the `n` oldest unread bytes.
    fn evict(&mut self, n: usize) {
        debug_assert!(n <= self.len() && !self.draining);
        if n == 0 {
            return;
        }
        self.r = self.wrap_pos(self.r, n);
        self.full = false;
    }

    pub(crate) fn read_byte(&mut self, slab: &Slab) -> Result<u8> {
        if self.draining || self.is_empty() {
            return Err(RingError::Empty);
        }
        let mut byte = [0u8; 1];
        self.copy_out(slab, self.r, &mut byte);
        self.r = self.wrap_pos(self.r, 1);
        self.full = false;
        Ok(byte[0])
    }

    pub(crate) fn write_byte(&mut self, slab: &Slab, byte: u8, overwrite: bool) -> Result<()> {
        if self.filling {
            return Err(RingError::Full);
        }
        if self.full {
            if !overwrite || self.draining {
                return Err(RingError::Full);
            }
            self.evict(1);
        }
        self.copy_in(slab, self.w, &[byte]);
        self.w = self.wrap_pos(self.w, 1);
        if self.w == self.r {
            self.full = true;
        }
        Ok(())
    }

    /// Lends out the largest contiguous free run at the write cursor.
    ///
    /// Returns `None` when there is no room or another fill is out.
    pub(crate) fn begin_fill(&mut self) -> Option<Segment> {
        if self.filling || self.full {
            return None;
        }
        let len = if self.w >= self.r {
            self.size - self.w
        } else {
            self.r - self.w
        };
        self.filling = true;
        Some(Segment { start: self.w, len })
    }

    /// Commits `n` bytes written into the segment from [`begin_fill`](Self::begin_fill).
    pub(crate) fn finish_fill(&mut self, n: usize) {
        debug_assert!(self.filling);
        self.filling = false;
        if n == 0 {
            return;
        }
        self.w = self.wrap_pos(self.w, n);
        if self.w == self.r {
            self.full = true;
        }
    }

    /// Lends out the largest contiguous unread run at the read cursor,
    /// capped at `max` bytes.
    pub(crate) fn begin_drain(&mut self, max: usize) -> Option<Segment> {
        if self.draining || self.is_empty() {
            return None;
        }
        let run = if self.r >= self.w {
            self.size - self.r
        } else {
            self.w - self.r
        };
        self.draining = true;
        Some(Segment {
            start: self.r,
            len: run.min(max),
        })
    }

    /// Consumes `n` bytes handed out by [`begin_drain`](Self::begin_drain).
    pub(crate) fn finish_drain(&mut self, n: usize) {
        debug_assert!(self.draining);
        self.draining = false;
        if n == 0 {
            return;
        }
        self.r = self.wrap_pos(self.r, n);
        self.full = false;
    }
}
