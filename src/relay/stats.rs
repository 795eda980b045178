//! Relay counters

use tracing::info;

/// Transfer statistics, owned by the pump and handed back when it stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes read from the source into the ring.
    pub bytes_in: u64,
    /// Bytes written from the ring to the sink.
    pub bytes_out: u64,
    /// Read calls issued, including ones that would have blocked.
    pub reads: u64,
    /// Write calls issued, including ones that would have blocked.
    pub writes: u64,
    /// Transfers that found their descriptor not ready after all.
    pub would_block: u64,
    /// Completed waits on the poller.
    pub iterations: u64,
}

impl RelayStats {
    /// Bytes ingested but not yet drained.
    pub fn in_flight(&self) -> u64 {
        self.bytes_in - self.bytes_out
    }

    pub fn log(&self) {
        info!(
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            reads = self.reads,
            writes = self.writes,
            would_block = self.would_block,
            iterations = self.iterations,
            "relay statistics"
        );
    }
}
