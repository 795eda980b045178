//! Error types for buffer setup and the relay loop.
//!
//! Would-block conditions never show up here: the pump absorbs them and
//! retries on the next readiness event. Everything in [`RelayError`] ends the
//! relay.

use std::io;

use thiserror::Error;

/// Failures while sizing or mapping the ring buffer.
#[derive(Debug, Error)]
pub enum InitError {
    /// The requested size cannot be expressed as a mirrored power-of-two
    /// number of pages.
    #[error("ring capacity for a {hint} byte request exceeds the supported maximum")]
    CapacityTooLarge {
        /// The sizing hint that was rejected.
        hint: usize,
    },

    /// The platform page size could not be determined.
    #[error("unable to query the page size: {0}")]
    PageSize(#[source] io::Error),

    /// One of the mapping system calls failed.
    #[error("unable to map ring buffer ({stage}): {source}")]
    Map {
        /// Which step of the mapping failed.
        stage: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The requested backing is not available on this platform.
    #[error("mirrored mappings are not supported on this platform")]
    Unsupported,
}

impl InitError {
    pub(crate) fn map(stage: &'static str, source: io::Error) -> Self {
        Self::Map { stage, source }
    }
}

/// Fatal conditions that end the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The ring buffer could not be created.
    #[error(transparent)]
    Init(#[from] InitError),

    /// The maximum frame size was zero or too large to triple.
    #[error("invalid maximum frame size {0}")]
    InvalidFrameSize(u32),

    /// A descriptor could not be switched to non-blocking mode.
    #[error("unable to make descriptor non-blocking: {0}")]
    Nonblocking(#[source] io::Error),

    /// The readiness multiplexer could not be created.
    #[error("unable to create poller: {0}")]
    Poller(#[source] io::Error),

    /// Arming or disarming interest in a descriptor failed.
    #[error("unable to update {what} registration: {source}")]
    Register {
        /// `"source"` or `"sink"`.
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// Waiting for readiness failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Reading from the source failed.
    #[error("source read failed: {0}")]
    Source(#[source] io::Error),

    /// Writing to the sink failed, typically because the consumer went away.
    #[error("sink write failed: {0}")]
    Sink(#[source] io::Error),

    /// The sink accepted zero bytes of a non-empty write.
    #[error("sink stopped accepting data")]
    SinkClosed,
}

impl RelayError {
    pub(crate) fn register(what: &'static str, source: io::Error) -> Self {
        Self::Register { what, source }
    }
}
