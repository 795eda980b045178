//! Relay layer: readiness-driven pump between two descriptors
//!
//! Uses mio for non-blocking I/O multiplexing (epoll/kqueue).
//!
//! Features:
//! - One read or write per readiness event, straight into the ring
//! - Backpressure by arming only the sides the ring can serve
//! - Deterministic teardown: poller, then mapping, then descriptors

mod config;
mod descriptor;
mod flow;
mod pump;
mod stats;

pub use config::{RelayConfig, DEFAULT_MAX_FRAME, FRAMES_PER_RING, MAX_SNAPLEN, MIN_SNAPLEN};
pub use descriptor::{grow_receive_buffer, set_nonblocking, StatusFlagsGuard};
pub use flow::{Arming, FlowController};
pub use pump::{EventPump, Readiness};
pub use stats::RelayStats;
