//! Event pump: source -> ring -> sink
//!
//! One thread, one poller, two tokens. Interests follow dispatch semantics:
//! once an interest fires it counts as disarmed until the next iteration
//! re-arms it, so the flow controller alone decides what gets watched.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, info, trace, warn};

use super::descriptor::set_nonblocking;
use super::flow::FlowController;
use super::{RelayConfig, RelayStats};
use crate::core::RingBuffer;
use crate::error::RelayError;

const INGEST_TOKEN: Token = Token(0);
const DRAIN_TOKEN: Token = Token(1);
const EVENTS_CAPACITY: usize = 2;

/// What a readiness event asks the pump to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The source has bytes (or end-of-stream) to read.
    IngestReady,
    /// The sink can take more bytes.
    DrainReady,
}

impl Readiness {
    fn from_token(token: Token) -> Option<Self> {
        match token {
            INGEST_TOKEN => Some(Self::IngestReady),
            DRAIN_TOKEN => Some(Self::DrainReady),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    /// Not registered with the poller.
    Idle,
    /// Registered and waiting for an event.
    Armed,
    /// Registered, but its event was delivered and not yet re-armed.
    Fired,
    /// The poller refuses this descriptor (a regular file); it is always
    /// ready and serviced without waiting while armed.
    Unpollable { armed: bool },
}

/// One descriptor's interest and its dispatch state.
#[derive(Debug)]
struct Watch {
    what: &'static str,
    fd: RawFd,
    token: Token,
    interest: Interest,
    state: Registration,
}

impl Watch {
    fn new(what: &'static str, fd: RawFd, token: Token, interest: Interest) -> Self {
        Self {
            what,
            fd,
            token,
            interest,
            state: Registration::Idle,
        }
    }

    /// Moves the registration towards `want`, touching the poller only when
    /// the state actually changes.
    fn apply(&mut self, registry: &Registry, want: bool) -> Result<(), RelayError> {
        let next = match (self.state, want) {
            (Registration::Unpollable { .. }, armed) => Registration::Unpollable { armed },
            (Registration::Idle, true) => {
                match registry.register(&mut SourceFd(&self.fd), self.token, self.interest) {
                    Ok(()) => Registration::Armed,
                    Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
                        warn!(
                            what = self.what,
                            fd = self.fd,
                            "descriptor cannot be polled, treating it as always ready"
                        );
                        Registration::Unpollable { armed: true }
                    }
                    Err(e) => return Err(RelayError::register(self.what, e)),
                }
            }
            (Registration::Fired, true) => {
                registry
                    .reregister(&mut SourceFd(&self.fd), self.token, self.interest)
                    .map_err(|e| RelayError::register(self.what, e))?;
                Registration::Armed
            }
            (Registration::Armed | Registration::Fired, false) => {
                registry
                    .deregister(&mut SourceFd(&self.fd))
                    .map_err(|e| RelayError::register(self.what, e))?;
                Registration::Idle
            }
            (Registration::Idle, false) | (Registration::Armed, true) => return Ok(()),
        };

        if next != self.state {
            debug!(what = self.what, from = ?self.state, to = ?next, "interest updated");
            self.state = next;
        }
        Ok(())
    }

    fn fired(&mut self) {
        if self.state == Registration::Armed {
            self.state = Registration::Fired;
        }
    }

    fn always_ready(&self) -> bool {
        self.state == Registration::Unpollable { armed: true }
    }
}

/// Owns everything the relay needs and moves bytes until the source ends or
/// something fails.
///
/// Field order is teardown order: the poller goes first so no more events
/// are accepted, then the ring mapping, then the source and sink.
pub struct EventPump<S, D> {
    poll: Poll,
    ring: RingBuffer,
    source: S,
    sink: D,
    source_watch: Watch,
    sink_watch: Watch,
    flow: FlowController,
    source_open: bool,
    stats: RelayStats,
}

impl<S, D> EventPump<S, D>
where
    S: Read + AsFd,
    D: Write + AsFd,
{
    /// Takes ownership of both descriptors, switches them to non-blocking
    /// mode and maps a ring of at least `3 * config.max_frame` bytes.
    pub fn new(source: S, sink: D, config: RelayConfig) -> Result<Self, RelayError> {
        let hint = config.capacity_hint()?;

        set_nonblocking(source.as_fd()).map_err(RelayError::Nonblocking)?;
        set_nonblocking(sink.as_fd()).map_err(RelayError::Nonblocking)?;

        let ring = RingBuffer::with_backing(hint, config.backing)?;
        let poll = Poll::new().map_err(RelayError::Poller)?;

        let source_watch = Watch::new(
            "source",
            source.as_fd().as_raw_fd(),
            INGEST_TOKEN,
            Interest::READABLE,
        );
        let sink_watch = Watch::new(
            "sink",
            sink.as_fd().as_raw_fd(),
            DRAIN_TOKEN,
            Interest::WRITABLE,
        );

        let flow = FlowController::new(config.max_frame as usize);
        if ring.backing_kind().is_fallback() {
            warn!(
                backing = %ring.backing_kind(),
                "mirrored backing not in use, wrapped commits will copy"
            );
        }
        info!(
            capacity = ring.capacity(),
            backing = %ring.backing_kind(),
            min_chunk = flow.min_chunk(),
            "relay initialized"
        );

        Ok(Self {
            poll,
            ring,
            source,
            sink,
            source_watch,
            sink_watch,
            flow,
            source_open: true,
            stats: RelayStats::default(),
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Runs until the source reaches end-of-stream and every buffered byte
    /// has been written, or until a fatal error.
    ///
    /// All resources are released before this returns, on either path. On
    /// error, bytes still in the ring are dropped.
    pub fn run(mut self) -> Result<RelayStats, RelayError> {
        let result = self.pump();
        match &result {
            Ok(stats) => stats.log(),
            Err(_) => warn!(
                bytes_in = self.stats.bytes_in,
                bytes_out = self.stats.bytes_out,
                dropped = self.ring.count(),
                "relay stopped"
            ),
        }
        result
    }

    fn pump(&mut self) -> Result<RelayStats, RelayError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut ready: Vec<Readiness> = Vec::with_capacity(EVENTS_CAPACITY);

        loop {
            let mut arming = self.flow.decide_for(&self.ring);
            if !self.source_open {
                if self.ring.is_empty() {
                    return Ok(self.stats);
                }
                arming.ingest = false;
            }

            self.source_watch.apply(self.poll.registry(), arming.ingest)?;
            self.sink_watch.apply(self.poll.registry(), arming.drain)?;

            let timeout = if self.source_watch.always_ready() || self.sink_watch.always_ready() {
                Some(Duration::ZERO)
            } else {
                None
            };

            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RelayError::Poll(e)),
            }
            self.stats.iterations += 1;

            ready.extend(events.iter().filter_map(|e| Readiness::from_token(e.token())));
            if self.source_watch.always_ready() {
                ready.push(Readiness::IngestReady);
            }
            if self.sink_watch.always_ready() {
                ready.push(Readiness::DrainReady);
            }

            for readiness in ready.drain(..) {
                match readiness {
                    Readiness::IngestReady => {
                        self.source_watch.fired();
                        self.ingest()?;
                    }
                    Readiness::DrainReady => {
                        self.sink_watch.fired();
                        self.drain()?;
                    }
                }
            }
        }
    }

    /// One read from the source into the ingest window.
    fn ingest(&mut self) -> Result<(), RelayError> {
        if !self.source_open {
            return Ok(());
        }
        let window = self.ring.ingest_window();
        let want = window.len();
        if want == 0 {
            return Ok(());
        }

        self.stats.reads += 1;
        match self.source.read(window) {
            Ok(0) => {
                self.source_open = false;
                info!(buffered = self.ring.count(), "source reached end of stream");
            }
            Ok(n) => {
                self.ring.commit_ingest(n);
                self.stats.bytes_in += n as u64;
                trace!(n, want, count = self.ring.count(), "ingest");
            }
            Err(ref e) if is_transient(e) => self.stats.would_block += 1,
            Err(e) => return Err(RelayError::Source(e)),
        }
        Ok(())
    }

    /// One write from the drain window to the sink.
    fn drain(&mut self) -> Result<(), RelayError> {
        let window = self.ring.drain_window();
        let want = window.len();
        if want == 0 {
            return Ok(());
        }

        self.stats.writes += 1;
        match self.sink.write(window) {
            Ok(0) => return Err(RelayError::SinkClosed),
            Ok(n) => {
                self.ring.commit_drain(n);
                self.stats.bytes_out += n as u64;
                trace!(n, want, count = self.ring.count(), "drain");
            }
            Err(ref e) if is_transient(e) => self.stats.would_block += 1,
            Err(e) => return Err(RelayError::Sink(e)),
        }
        Ok(())
    }
}

#[inline]
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BackingKind;
    use std::os::unix::net::UnixStream;
    use std::thread;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_readiness_tokens() {
        assert_eq!(
            Readiness::from_token(INGEST_TOKEN),
            Some(Readiness::IngestReady)
        );
        assert_eq!(
            Readiness::from_token(DRAIN_TOKEN),
            Some(Readiness::DrainReady)
        );
        assert_eq!(Readiness::from_token(Token(7)), None);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn test_new_sizes_ring_from_frame() {
        let (src, _src_peer) = UnixStream::pair().unwrap();
        let (sink, _sink_peer) = UnixStream::pair().unwrap();
        let pump = EventPump::new(src, sink, RelayConfig::new(1500)).unwrap();

        assert!(pump.ring().capacity() >= 3 * 1500);
        assert!(pump.ring().capacity().is_power_of_two());
        assert!(pump.ring().is_empty());
        assert_eq!(pump.stats(), RelayStats::default());
    }

    #[test]
    fn test_zero_frame_rejected() {
        let (src, _src_peer) = UnixStream::pair().unwrap();
        let (sink, _sink_peer) = UnixStream::pair().unwrap();
        assert!(matches!(
            EventPump::new(src, sink, RelayConfig::new(0)),
            Err(RelayError::InvalidFrameSize(0))
        ));
    }

    #[test]
    fn test_flushes_buffer_after_source_eof() {
        let (src, mut src_peer) = UnixStream::pair().unwrap();
        let (sink, mut sink_peer) = UnixStream::pair().unwrap();
        let data = pattern(10_000);

        src_peer.write_all(&data).unwrap();
        drop(src_peer);

        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            sink_peer.read_to_end(&mut out).unwrap();
            out
        });

        let config = RelayConfig::new(1500).with_backing(BackingKind::Flat);
        let stats = EventPump::new(src, sink, config).unwrap().run().unwrap();

        assert_eq!(reader.join().unwrap(), data);
        assert_eq!(stats.bytes_in, data.len() as u64);
        assert_eq!(stats.bytes_out, data.len() as u64);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn test_source_read_error_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let src = std::fs::File::open(dir.path()).unwrap();
        let (sink, mut sink_peer) = UnixStream::pair().unwrap();

        let result = EventPump::new(src, sink, RelayConfig::new(1500)).unwrap().run();
        match result {
            Err(RelayError::Source(e)) => assert_eq!(e.raw_os_error(), Some(libc::EISDIR)),
            other => panic!("expected source error, got {other:?}"),
        }

        // the sink was closed on the way out
        let mut out = Vec::new();
        sink_peer.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_closed_sink_is_fatal() {
        let (src, mut src_peer) = UnixStream::pair().unwrap();
        let (sink, sink_peer) = UnixStream::pair().unwrap();
        drop(sink_peer);
        src_peer.write_all(b"packet bytes").unwrap();

        let result = EventPump::new(src, sink, RelayConfig::new(64)).unwrap().run();
        match result {
            Err(RelayError::Sink(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected sink error, got {other:?}"),
        }
        // keep the source open until the pump gave up
        drop(src_peer);
    }
}
