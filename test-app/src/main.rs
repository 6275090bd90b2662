// sdrctl test application -- CLI tool for exercising a session controller
// against a real network SDR receiver.
//
// Usage:
//   sdrctl-test-app --host 192.168.1.50 info
//   sdrctl-test-app --host 192.168.1.50 stream --seconds 5 --frequency 7100000
//   sdrctl-test-app --host 192.168.1.50 --data-port 50100 stream --rate 192000
//   sdrctl-test-app --host 192.168.1.50 --verbose monitor --duration 30

use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use sdrctl_core::SessionEvent;
use sdrctl_session::{CaptureMode, SessionBuilder, SessionController};

/// Queue depth between the UDP receive loop and the datagram counter.
const IQ_QUEUE_DEPTH: usize = 1024;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sdrctl test application -- drives an SDR session from the command line.
#[derive(Parser)]
#[command(name = "sdrctl-test-app", version, about)]
struct Cli {
    /// Receiver IP address or hostname.
    #[arg(long)]
    host: String,

    /// TCP control port.
    #[arg(long, default_value_t = 50000)]
    control_port: u16,

    /// Local UDP port IQ data arrives on.
    #[arg(long, default_value_t = 50000)]
    data_port: u16,

    /// Command response timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Log protocol activity to stderr (overridden by RUST_LOG).
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect, print the device identification, and disconnect.
    Info,

    /// Run an acquisition and report datagram throughput.
    Stream {
        /// How long to acquire, in seconds.
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Center frequency in Hz.
        #[arg(long, default_value_t = 14_100_000)]
        frequency: u64,

        /// IQ sample rate in samples per second.
        #[arg(long, default_value_t = 2_048_000)]
        rate: u32,

        /// IQ sample width.
        #[arg(long, default_value = "24", value_enum)]
        bits: SampleBits,
    },

    /// Connect and print session events until the duration elapses.
    Monitor {
        /// Duration in seconds (0 = until the link drops).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SampleBits {
    #[value(name = "16")]
    Sixteen,
    #[value(name = "24")]
    TwentyFour,
}

impl From<SampleBits> for CaptureMode {
    fn from(bits: SampleBits) -> Self {
        match bits {
            SampleBits::Sixteen => CaptureMode::Contiguous16,
            SampleBits::TwentyFour => CaptureMode::Contiguous24,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn builder(cli: &Cli) -> SessionBuilder {
    SessionBuilder::new()
        .host(&cli.host)
        .control_port(cli.control_port)
        .data_port(cli.data_port)
        .command_timeout(Duration::from_millis(cli.timeout_ms))
        .init_timeout(Duration::from_millis(cli.timeout_ms))
}

fn format_freq(hz: u64) -> String {
    format!("{:.6} MHz", hz as f64 / 1_000_000.0)
}

async fn connect(session: &SessionController, host: &str) -> Result<()> {
    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to {host}"))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_info(cli: &Cli) -> Result<()> {
    let session = builder(cli).build()?;
    connect(&session, &cli.host).await?;

    let info = session.device_info().await.unwrap_or_default();
    let options = session.options();

    println!("Device Information");
    println!("  Name:           {}", info.name);
    println!("  Control:        {}:{}", cli.host, cli.control_port);
    println!();
    println!("Configured");
    println!("  Frequency:      {}", format_freq(options.center_frequency_hz));
    println!("  Sample rate:    {} S/s", options.sample_rate);

    session.disconnect().await;
    Ok(())
}

async fn cmd_stream(
    cli: &Cli,
    seconds: u64,
    frequency: u64,
    rate: u32,
    bits: SampleBits,
) -> Result<()> {
    if seconds == 0 {
        bail!("--seconds must be at least 1");
    }

    let (tx, mut rx) = mpsc::channel::<Bytes>(IQ_QUEUE_DEPTH);
    let session = builder(cli)
        .center_frequency(frequency)
        .sample_rate(rate)
        .capture_mode(bits.into())
        .iq_sink(tx)
        .build()?;

    connect(&session, &cli.host).await?;
    if let Err(e) = session.start_acquisition().await {
        session.disconnect().await;
        return Err(e).context("failed to start acquisition");
    }

    println!(
        "Acquiring at {} / {} S/s for {}s...",
        format_freq(frequency),
        rate,
        seconds
    );

    let started = Instant::now();
    let deadline = started + Duration::from_secs(seconds);
    let (mut datagrams, mut bytes) = (0u64, 0u64);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(datagram)) => {
                datagrams += 1;
                bytes += datagram.len() as u64;
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    let elapsed = started.elapsed().as_secs_f64();

    let stopped = session.stop_acquisition().await;
    session.disconnect().await;
    stopped.context("failed to stop acquisition")?;

    println!("Datagrams:        {datagrams}");
    println!("Bytes:            {bytes}");
    println!(
        "Throughput:       {:.1} datagrams/s, {:.2} MB/s",
        datagrams as f64 / elapsed,
        bytes as f64 / elapsed / 1_000_000.0
    );
    Ok(())
}

async fn cmd_monitor(cli: &Cli, duration_secs: u64) -> Result<()> {
    let session = builder(cli).build()?;
    let mut event_rx = session.subscribe();
    connect(&session, &cli.host).await?;

    println!("Monitoring session events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let next = match deadline {
            Some(dl) => match tokio::time::timeout_at(dl, event_rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    println!("Monitor duration elapsed.");
                    break;
                }
            },
            None => event_rx.recv().await,
        };

        match next {
            Ok(SessionEvent::ConnectionLost) => {
                println!("[event] ConnectionLost");
                break;
            }
            Ok(event) => println!("[event] {event:?}"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Err(broadcast::error::RecvError::Closed) => {
                println!("Event channel closed.");
                break;
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.timeout_ms == 0 {
        bail!("--timeout-ms must be non-zero");
    }

    match &cli.command {
        Command::Info => cmd_info(&cli).await,
        Command::Stream {
            seconds,
            frequency,
            rate,
            bits,
        } => cmd_stream(&cli, *seconds, *frequency, *rate, *bits).await,
        Command::Monitor { duration } => cmd_monitor(&cli, *duration).await,
    }
}
