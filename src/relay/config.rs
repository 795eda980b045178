//! Relay sizing and layout options.

use crate::core::BackingKind;
use crate::error::RelayError;

/// Largest frame a capture source hands over in one read (tcpdump's default
/// snap length).
pub const DEFAULT_MAX_FRAME: u32 = 262_144;

/// Smallest snap length the CLI accepts.
pub const MIN_SNAPLEN: u32 = 64;

/// Largest snap length the CLI accepts.
pub const MAX_SNAPLEN: u32 = DEFAULT_MAX_FRAME;

/// Frames the ring must hold at once; keeps ingest from starving while the
/// sink is stalled.
pub const FRAMES_PER_RING: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum bytes one read from the source may produce.
    pub max_frame: u32,
    /// Ring memory layout.
    pub backing: BackingKind,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
            backing: BackingKind::preferred(),
        }
    }
}

impl RelayConfig {
    pub fn new(max_frame: u32) -> Self {
        Self {
            max_frame,
            ..Self::default()
        }
    }

    pub fn with_backing(mut self, backing: BackingKind) -> Self {
        self.backing = backing;
        self
    }

    /// Smallest ring size that satisfies this configuration.
    pub fn capacity_hint(&self) -> Result<usize, RelayError> {
        if self.max_frame == 0 {
            return Err(RelayError::InvalidFrameSize(self.max_frame));
        }
        (self.max_frame as usize)
            .checked_mul(FRAMES_PER_RING)
            .ok_or(RelayError::InvalidFrameSize(self.max_frame))
    }
}
