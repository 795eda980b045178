//! pcap-relay binary
//!
//! Relays a live capture stream from a source descriptor to a sink
//! descriptor without blocking on either, e.g.
//!
//! ```text
//! pcap-relay --input /var/run/capture.fifo | tcpdump -r -
//! ```
//!
//! Logs go to stderr so stdout stays a clean data sink.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{debug, error, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pcap_relay::core::BackingKind;
use pcap_relay::error::RelayError;
use pcap_relay::relay::{
    grow_receive_buffer, EventPump, RelayConfig, StatusFlagsGuard, DEFAULT_MAX_FRAME,
    FRAMES_PER_RING, MAX_SNAPLEN, MIN_SNAPLEN,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Read the capture stream from this path instead of stdin.
    #[arg(short, long, value_name = "PATH", env = "PCAP_RELAY_INPUT")]
    input: Option<PathBuf>,

    /// Write the capture stream to this path instead of stdout.
    #[arg(short, long, value_name = "PATH", env = "PCAP_RELAY_OUTPUT")]
    output: Option<PathBuf>,

    /// Largest frame the source delivers in one read.
    #[arg(
        short,
        long,
        value_name = "BYTES",
        env = "PCAP_RELAY_SNAPLEN",
        default_value_t = DEFAULT_MAX_FRAME,
        value_parser = clap::value_parser!(u32).range(MIN_SNAPLEN as i64..=MAX_SNAPLEN as i64)
    )]
    snaplen: u32,

    /// Ring memory layout: `mirrored` or `flat`.
    #[arg(short, long, value_name = "LAYOUT", default_value_t = BackingKind::preferred())]
    backing: BackingKind,

    /// Log level (e.g. "debug", "warn").
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        env = "PCAP_RELAY_LOG_LEVEL",
        default_value = "info"
    )]
    log_level: Level,
}

fn init_logging(level: Level) {
    let mut fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    if level >= Level::DEBUG {
        fmt_layer = fmt_layer.with_file(true).with_line_number(true);
    }

    let filter = EnvFilter::new(format!("warn,pcap_relay={level}"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn open_source(path: Option<&PathBuf>) -> io::Result<File> {
    match path {
        Some(path) => File::open(path),
        None => Ok(File::from(io::stdin().as_fd().try_clone_to_owned()?)),
    }
}

fn open_sink(path: Option<&PathBuf>) -> io::Result<File> {
    match path {
        Some(path) => OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path),
        None => Ok(File::from(io::stdout().as_fd().try_clone_to_owned()?)),
    }
}

fn run_relay(cli: &Cli) -> Result<(), RelayError> {
    // stdin and stdout share their file description with the invoking shell
    let mut restore = Vec::new();
    if cli.input.is_none() {
        let guard = StatusFlagsGuard::save(io::stdin().as_fd()).map_err(RelayError::Nonblocking)?;
        restore.push(guard);
    }
    if cli.output.is_none() {
        let guard = StatusFlagsGuard::save(io::stdout().as_fd()).map_err(RelayError::Nonblocking)?;
        restore.push(guard);
    }

    let source = open_source(cli.input.as_ref()).map_err(RelayError::Source)?;
    let sink = open_sink(cli.output.as_ref()).map_err(RelayError::Sink)?;

    let want = cli.snaplen as usize * FRAMES_PER_RING;
    match grow_receive_buffer(source.as_fd(), want) {
        Ok(Some(granted)) => debug!(requested = want, granted, "source receive buffer sized"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "unable to size source receive buffer"),
    }

    let config = RelayConfig::new(cli.snaplen).with_backing(cli.backing);
    EventPump::new(source, sink, config)?.run()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    if let Err(e) = run_relay(&cli) {
        error!(error = %e, "relay failed");
        process::exit(1);
    }
}
