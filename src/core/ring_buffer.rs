//! Byte ring with a mirrored backing store
//!
//! Single owner, single thread. `end` only moves on ingest and `start` only
//! moves on drain; both are free-running `u32` cursors masked on access.

use std::slice;

use super::mirror::{capacity_for, page_size, Backing, BackingKind};
use crate::error::InitError;

/// Fixed-capacity FIFO of bytes.
///
/// Both windows are always the full contiguous span (`free()` bytes for
/// ingest, `count()` bytes for drain), even when that span crosses the
/// physical end of the buffer.
pub struct RingBuffer {
    capacity: u32,
    mask: u32,
    start: u32,
    end: u32,
    backing: Backing,
}

impl RingBuffer {
    /// Ring of at least `capacity_hint` bytes using the platform's preferred
    /// backing.
    pub fn new(capacity_hint: usize) -> Result<Self, InitError> {
        Self::with_backing(capacity_hint, BackingKind::preferred())
    }

    /// Ring of at least `capacity_hint` bytes, rounded up to a power-of-two
    /// number of pages.
    pub fn with_backing(capacity_hint: usize, kind: BackingKind) -> Result<Self, InitError> {
        let capacity = capacity_for(capacity_hint, page_size()?)?;
        let backing = Backing::map(kind, capacity)?;

        let capacity = capacity as u32;
        Ok(Self {
            capacity,
            mask: capacity - 1,
            start: 0,
            end: 0,
            backing,
        })
    }

    /// Writable span at the ingest cursor, `free()` bytes long.
    #[inline(always)]
    pub fn ingest_window(&mut self) -> &mut [u8] {
        let offset = (self.end & self.mask) as usize;
        let len = self.free();
        // SAFETY: offset < capacity and len <= capacity, so the span stays
        // inside the 2 * capacity mapping; &mut self prevents aliasing.
        unsafe { slice::from_raw_parts_mut(self.backing.as_mut_ptr().add(offset), len) }
    }

    /// Marks `n` bytes of the last ingest window as filled.
    ///
    /// # Panics
    /// If `n` exceeds `free()`. Accounting would be corrupt past that point.
    #[inline(always)]
    pub fn commit_ingest(&mut self, n: usize) {
        assert!(
            n <= self.free(),
            "commit_ingest({n}) exceeds free space {}",
            self.free()
        );
        self.backing.sync_ingest(
            (self.end & self.mask) as usize,
            n,
            (self.start & self.mask) as usize,
            self.capacity as usize,
        );
        self.end = self.end.wrapping_add(n as u32);
    }

    /// Readable span at the drain cursor, `count()` bytes long, oldest first.
    #[inline(always)]
    pub fn drain_window(&self) -> &[u8] {
        let offset = (self.start & self.mask) as usize;
        let len = self.count();
        // SAFETY: same bounds argument as ingest_window
        unsafe { slice::from_raw_parts(self.backing.as_ptr().add(offset), len) }
    }

    /// Releases `n` bytes from the front of the last drain window.
    ///
    /// # Panics
    /// If `n` exceeds `count()`.
    #[inline(always)]
    pub fn commit_drain(&mut self, n: usize) {
        assert!(
            n <= self.count(),
            "commit_drain({n}) exceeds buffered bytes {}",
            self.count()
        );
        self.start = self.start.wrapping_add(n as u32);
    }

    /// Bytes held, waiting to be drained.
    #[inline(always)]
    pub fn count(&self) -> usize {
        let count = self.end.wrapping_sub(self.start);
        debug_assert!(count <= self.capacity);
        count as usize
    }

    /// Bytes available for ingest.
    #[inline(always)]
    pub fn free(&self) -> usize {
        self.capacity as usize - self.count()
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.count() == self.capacity as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Layout backing this ring.
    pub fn backing_kind(&self) -> BackingKind {
        self.backing.kind()
    }

    /// Releases the mapping now instead of at scope exit.
    pub fn fini(self) {
        drop(self);
    }

    /// Starts both cursors at `cursor`, for exercising `u32` wraparound.
    #[cfg(test)]
    fn set_cursors(&mut self, cursor: u32) {
        self.start = cursor;
        self.end = cursor;
    }

    /// Reads a byte anywhere in the 2x address range.
    #[cfg(test)]
    fn peek(&self, idx: usize) -> u8 {
        assert!(idx < 2 * self.capacity());
        unsafe { *self.backing.as_ptr().add(idx) }
    }

    /// Writes a byte anywhere in the 2x address range.
    #[cfg(test)]
    fn poke(&mut self, idx: usize, val: u8) {
        assert!(idx < 2 * self.capacity());
        unsafe { *self.backing.as_mut_ptr().add(idx) = val }
    }
}
