//! CLI entry point for daq-ring
//!
//! Pipes stdin through an overwriting ring buffer:
//! - `tail` keeps the last N bytes of a stream and prints them on EOF
//! - `follow` copies the stream to stdout through a live reader, resubscribing
//!   whenever the reader falls a full lap behind
//!
//! # Usage
//!
//! ```bash
//! dmesg | daq-ring tail --capacity 4096
//! tail -f app.log | daq-ring follow --chunk 512 --timeout-ms 100
//! ```

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_ring::{config::DEFAULT_CONFIG_PATH, Reader, RingBuffer, RingConfig, RingError, StartPosition};
use logging::{LoggingConfig, OutputFormat};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn, Level};

const STDIN_CHUNK: usize = 8 * 1024;
const DEFAULT_FOLLOW_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "daq-ring")]
#[command(about = "Overwriting multi-reader byte ring over stdin", long_about = None)]
struct Cli {
    /// Log verbosity (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Buffer stdin and print the retained tail on EOF
    Tail {
        /// Ring capacity in bytes (overrides the config file)
        #[arg(long)]
        capacity: Option<usize>,

        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Stream stdin to stdout through a ring reader
    Follow {
        /// Ring capacity in bytes (overrides the config file)
        #[arg(long)]
        capacity: Option<usize>,

        /// Configuration file (TOML)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Bytes per reader call
        #[arg(long, default_value = "4096")]
        chunk: usize,

        /// Reader wait before re-checking for end of input
        /// (overrides `read_timeout_ms`; 100 ms when neither is set)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(LoggingConfig::new(cli.log_level, cli.log_format))
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Tail { capacity, config } => {
            let config = load_config(&config, capacity)?;
            run_tail(&config)
        }
        Commands::Follow {
            capacity,
            config,
            chunk,
            timeout_ms,
        } => {
            let config = load_follow_config(&config, capacity, timeout_ms)?;
            anyhow::ensure!(chunk > 0, "--chunk must be greater than 0");
            run_follow(&config, chunk)
        }
    }
}

fn load_config(path: &std::path::Path, capacity: Option<usize>) -> Result<RingConfig> {
    let mut config = RingConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    if let Some(capacity) = capacity {
        config.capacity = capacity;
    }
    config.validate()?;
    debug!(?config, "configuration loaded");
    Ok(config)
}

/// Like [`load_config`], with `--timeout-ms` replacing the file's read timeout only when given.
fn load_follow_config(
    path: &std::path::Path,
    capacity: Option<usize>,
    timeout_ms: Option<u64>,
) -> Result<RingConfig> {
    let mut config = load_config(path, capacity)?;
    if timeout_ms.is_some() {
        config.read_timeout_ms = timeout_ms;
        config.validate()?;
    }
    Ok(config)
}

/// Copy stdin into `ring` until EOF, returning the byte count.
fn pump_stdin(ring: &RingBuffer) -> Result<u64> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut buf = vec![0u8; STDIN_CHUNK];
    let mut total = 0u64;

    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading stdin"),
        };
        ring.write(&buf[..n]);
        total += n as u64;
    }

    Ok(total)
}

fn run_tail(config: &RingConfig) -> Result<()> {
    let ring = RingBuffer::from_config(config)?;
    let total = pump_stdin(&ring)?;

    let tail = ring.snapshot()?;
    let mut out = io::stdout().lock();
    out.write_all(&tail).context("writing tail to stdout")?;
    out.flush()?;

    info!(
        total_bytes = total,
        retained = tail.len(),
        capacity = ring.capacity(),
        "input exhausted"
    );
    Ok(())
}

fn run_follow(config: &RingConfig, chunk: usize) -> Result<()> {
    let ring = Arc::new(RingBuffer::from_config(config)?);
    let input_done = Arc::new(AtomicBool::new(false));
    let timeout = config.read_timeout().unwrap_or(DEFAULT_FOLLOW_TIMEOUT);

    let reader = ring.new_reader();
    let follower = {
        let ring = Arc::clone(&ring);
        let input_done = Arc::clone(&input_done);
        thread::Builder::new()
            .name("daq-ring-follow".into())
            .spawn(move || follow(&ring, reader, chunk, timeout, &input_done))
            .context("spawning follower thread")?
    };

    let total = pump_stdin(&ring)?;
    input_done.store(true, Ordering::Release);

    let stats = follower
        .join()
        .map_err(|_| anyhow::anyhow!("follower thread panicked"))??;

    info!(
        total_bytes = total,
        forwarded = stats.forwarded,
        resubscribed = stats.resubscribed,
        "input exhausted"
    );
    Ok(())
}

#[derive(Debug, Default)]
struct FollowStats {
    forwarded: u64,
    resubscribed: u64,
}

/// Drain `reader` to stdout until input ends and nothing is left to read.
fn follow(
    ring: &RingBuffer,
    mut reader: Reader,
    chunk: usize,
    timeout: Duration,
    input_done: &AtomicBool,
) -> Result<FollowStats> {
    let mut out = io::stdout().lock();
    let mut buf = vec![0u8; chunk];
    let mut stats = FollowStats::default();

    loop {
        match reader.read_timeout(&mut buf, timeout) {
            Ok(n) => {
                out.write_all(&buf[..n]).context("writing to stdout")?;
                out.flush()?;
                stats.forwarded += n as u64;
            }
            Err(RingError::TimedOut { .. }) => {
                if input_done.load(Ordering::Acquire) && matches!(reader.available(), Ok(0)) {
                    break;
                }
            }
            Err(RingError::Invalidated { reader: id }) => {
                warn!(
                    reader = %id,
                    forwarded = stats.forwarded,
                    "reader fell a full lap behind, data lost; resubscribing at latest"
                );
                reader = ring.new_reader_at(StartPosition::Latest);
                stats.resubscribed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(stats)
}
