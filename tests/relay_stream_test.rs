//! Stream tests - push capture-sized traffic through the relay
//!
//! A writer thread plays the capture source, a reader thread plays the
//! analysis tool, and the pump runs on the test thread between them.
//!
//! Usage:
//!   cargo test --release --test relay_stream_test -- --nocapture

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use pcap_relay::core::BackingKind;
use pcap_relay::error::RelayError;
use pcap_relay::relay::{EventPump, RelayConfig};

/// Frame-like records: a 16 byte header carrying the sequence number and a
/// body whose length varies with it, so reordering or loss shows up as a
/// content mismatch.
fn capture_stream(frames: u64, max_frame: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for seq in 0..frames {
        let body = (seq as usize * 7919) % (max_frame - 16);
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&(body as u64).to_le_bytes());
        out.extend((0..body).map(|i| (seq as usize + i) as u8));
    }
    out
}

fn backings() -> Vec<BackingKind> {
    let mut kinds = vec![BackingKind::Flat];
    if BackingKind::preferred() == BackingKind::Mirrored {
        kinds.push(BackingKind::Mirrored);
    }
    kinds
}

#[test]
fn test_relays_stream_in_order_under_backpressure() {
    const MAX_FRAME: usize = 1500;

    for backing in backings() {
        let data = capture_stream(2_000, MAX_FRAME);
        let expected = data.clone();

        let (source, mut source_peer) = UnixStream::pair().unwrap();
        let (sink, mut sink_peer) = UnixStream::pair().unwrap();

        let writer = thread::spawn(move || {
            for chunk in data.chunks(MAX_FRAME) {
                source_peer.write_all(chunk).unwrap();
            }
        });

        // slow consumer: small reads with pauses keep the sink stalled often
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            let mut buf = [0u8; 977];
            let mut reads = 0u32;
            loop {
                match sink_peer.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => panic!("reader failed: {e}"),
                }
                reads += 1;
                if reads % 16 == 0 {
                    thread::sleep(Duration::from_micros(50));
                }
            }
            out
        });

        let config = RelayConfig::new(MAX_FRAME as u32).with_backing(backing);
        let pump = EventPump::new(source, sink, config).unwrap();
        let capacity = pump.ring().capacity();

        let start = Instant::now();
        let stats = pump.run().unwrap();
        let elapsed = start.elapsed();

        writer.join().unwrap();
        let received = reader.join().unwrap();

        assert_eq!(received.len(), expected.len(), "{backing}: length");
        assert!(received == expected, "{backing}: content mismatch");
        assert_eq!(stats.bytes_in, expected.len() as u64);
        assert_eq!(stats.bytes_out, expected.len() as u64);
        // the ring is far smaller than the stream, so it must have cycled
        assert!(expected.len() > 10 * capacity);

        println!(
            "{backing}: {} bytes through a {} byte ring in {:?} ({} reads, {} writes, {} would-block)",
            stats.bytes_out, capacity, elapsed, stats.reads, stats.writes, stats.would_block
        );
    }
}

#[test]
fn test_relays_regular_files() {
    for backing in backings() {
        let data = capture_stream(300, 4096);

        let mut source = tempfile::tempfile().unwrap();
        source.write_all(&data).unwrap();
        source.seek(SeekFrom::Start(0)).unwrap();

        let mut sink = tempfile::tempfile().unwrap();
        let sink_handle: File = sink.try_clone().unwrap();

        let config = RelayConfig::new(4096).with_backing(backing);
        let stats = EventPump::new(source, sink_handle, config)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(stats.bytes_out, data.len() as u64);

        let mut out = Vec::new();
        sink.seek(SeekFrom::Start(0)).unwrap();
        sink.read_to_end(&mut out).unwrap();
        assert!(out == data, "{backing}: file content mismatch");
    }
}

#[test]
fn test_empty_source_finishes_immediately() {
    let (source, source_peer) = UnixStream::pair().unwrap();
    let (sink, mut sink_peer) = UnixStream::pair().unwrap();
    drop(source_peer);

    let stats = EventPump::new(source, sink, RelayConfig::new(1500))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(stats.bytes_in, 0);
    assert_eq!(stats.bytes_out, 0);

    // the pump closed its end of the sink on the way out
    let mut out = Vec::new();
    sink_peer.read_to_end(&mut out).unwrap();
    assert!(out.is_empty());
}

#[test]
fn test_consumer_exit_ends_relay() {
    let (source, mut source_peer) = UnixStream::pair().unwrap();
    let (sink, mut sink_peer) = UnixStream::pair().unwrap();

    let writer = thread::spawn(move || {
        let chunk = [0x5Au8; 1024];
        // stops once the pump is gone and the source end is closed
        while source_peer.write_all(&chunk).is_ok() {}
    });

    let reader = thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut seen = 0;
        while seen < 64 * 1024 {
            match sink_peer.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => seen += n,
                Err(_) => break,
            }
        }
        seen
    });

    let result = EventPump::new(source, sink, RelayConfig::new(1024))
        .unwrap()
        .run();

    match result {
        Err(RelayError::Sink(e)) => assert!(matches!(
            e.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
        )),
        other => panic!("expected sink failure, got {other:?}"),
    }

    assert!(reader.join().unwrap() >= 64 * 1024);
    writer.join().unwrap();
}
