//! Backpressure policy: which side of the relay may run next.

use crate::core::RingBuffer;

/// Interests to arm for the next wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arming {
    /// Watch the source for readability.
    pub ingest: bool,
    /// Watch the sink for writability.
    pub drain: bool,
}

/// Decides arming from buffer occupancy.
///
/// Ingest is armed only while a whole maximal frame fits, so one read never
/// has to stop short for lack of room. Drain is armed whenever anything is
/// buffered.
#[derive(Debug, Clone, Copy)]
pub struct FlowController {
    min_chunk: usize,
}

impl FlowController {
    /// # Panics
    /// If `min_chunk` is zero.
    pub fn new(min_chunk: usize) -> Self {
        assert!(min_chunk > 0, "min_chunk must be non-zero");
        Self { min_chunk }
    }

    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    #[inline]
    pub fn decide(&self, free: usize, count: usize) -> Arming {
        Arming {
            ingest: free >= self.min_chunk,
            drain: count > 0,
        }
    }

    /// Same as [`decide`](Self::decide) reading occupancy from `ring`.
    ///
    /// With `capacity >= min_chunk` the result always arms at least one side.
    #[inline]
    pub fn decide_for(&self, ring: &RingBuffer) -> Arming {
        let arming = self.decide(ring.free(), ring.count());
        debug_assert!(
            arming.ingest || arming.drain || ring.capacity() < self.min_chunk,
            "nothing armed: ring is neither drainable nor has room"
        );
        arming
    }
}
