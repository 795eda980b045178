//! Core module: byte ring over a mirrored mapping
//!
//! Design principles:
//! - Zero-copy: callers read and write straight into the mapped pages
//! - One contiguous window per side, whatever the cursor positions
//! - No allocation after init: the mapping is sized once from a hint

mod mirror;
mod ring_buffer;

pub use mirror::{capacity_for, page_size, BackingKind, MAX_CAPACITY};
pub use ring_buffer::RingBuffer;
