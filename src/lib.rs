//! pcap-relay - non-blocking zero-copy relay for capture streams
//!
//! Architecture:
//! - Zero-copy: a byte ring over a double memory mapping, so every read and
//!   write targets one contiguous window
//! - Backpressure: the source is only watched while a whole frame fits
//! - Single thread: one readiness loop, no locks
//!
//! ```no_run
//! use std::fs::File;
//! use pcap_relay::relay::{EventPump, RelayConfig};
//!
//! let source = File::open("/var/run/capture.fifo")?;
//! let sink = File::create("/tmp/capture.pcap")?;
//! let stats = EventPump::new(source, sink, RelayConfig::new(65_535))?.run()?;
//! println!("relayed {} bytes", stats.bytes_out);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod core;
pub mod error;
pub mod relay;

pub use crate::core::{BackingKind, RingBuffer};
pub use crate::error::{InitError, RelayError};
pub use crate::relay::{EventPump, FlowController, RelayConfig, RelayStats};
