//! NZXT Kraken X61 cooling daemon
//!
//! Runs the fan/pump control loop, plus a few one-shot commands for
//! inspecting the device and the configured curves.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kraken_x61_daemon::config::{self, ConfigWatcher, DaemonConfig};
use kraken_x61_daemon::daemon::{Daemon, ShutdownToken};
use kraken_x61_daemon::device::{KrakenX61, UsbConnector, usb};
use kraken_x61_daemon::protocol::{Channel, DEFAULT_COLOR};
use kraken_x61_daemon::utils::sensors::CpuSensor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// CLI Arguments
// =============================================================================

/// NZXT Kraken X61 cooling daemon
#[derive(Parser, Debug)]
#[command(name = "kraken-x61d")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log filter (e.g. info, debug, kraken_x61_daemon=trace). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cooling control loop (default)
    Run {
        /// Config file (default: /etc/kraken-x61/daemon.yml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Push the default color once and show the device status
    Status,

    /// List connected Kraken X61 devices
    List,

    /// Print the duty cycle a configured curve gives from 0°C to 100°C
    Curve {
        /// Config file (default: /etc/kraken-x61/daemon.yml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Channel: fan or pump
        #[arg(long, default_value = "fan")]
        channel: String,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match args.command.unwrap_or(Command::Run { config: None }) {
        Command::Run { config } => cmd_run(config),
        Command::Status => cmd_status(),
        Command::List => cmd_list(),
        Command::Curve { config, channel } => cmd_curve(config, &channel),
    }
}

/// `--log-level`, then `RUST_LOG`, then `info`.
fn init_logging(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_run(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    info!("STARTUP: kraken-x61d {} starting", VERSION);
    info!("STARTUP: Config file: {}", path.display());

    let watcher = ConfigWatcher::new(&path)
        .with_context(|| format!("Failed to open config file {}", path.display()))?;
    let config = DaemonConfig::load(&path).context("Failed to load config")?;
    let sensor = CpuSensor::from_config(config.cpu_temp_file.as_deref())
        .context("Failed to open CPU temperature source")?;

    let shutdown = ShutdownToken::new();
    let token = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("SIGNAL: Received termination signal - initiating shutdown");
        token.cancel();
    })
    .context("Failed to set signal handler")?;
    #[cfg(unix)]
    shutdown
        .register_signal(signal_hook::consts::SIGQUIT)
        .context("Failed to set SIGQUIT handler")?;

    let daemon = Daemon::start(UsbConnector::new(), sensor, watcher, config, shutdown)
        .context("Failed to start Kraken X61 session")?;
    let summary = daemon.run().context("Control loop failed")?;

    info!("SHUTDOWN: Daemon terminated gracefully ({})", summary);
    Ok(())
}

fn cmd_status() -> Result<()> {
    let transport = usb::open_first().context("Failed to open Kraken X61")?;
    let mut kraken = KrakenX61::open(transport).context("Failed to initialize device")?;
    let serial = kraken
        .serial_number()
        .context("Failed to read serial number")?;

    kraken.set_color(DEFAULT_COLOR);
    let status = kraken
        .push_color()
        .context("Device did not answer the color update")?;

    println!("Serial: {}", serial);
    print!("{}", status);
    Ok(())
}

fn cmd_list() -> Result<()> {
    let devices = usb::list_devices().context("Failed to enumerate devices")?;

    if devices.is_empty() {
        println!("❌ No Kraken X61 devices found.");
        return Ok(());
    }

    println!("🔍 Found {} device(s):\n", devices.len());
    for (i, device) in devices.iter().enumerate() {
        let serial_str = device.serial_number.as_deref().unwrap_or("unknown");
        println!("  {}. Serial: {}", i + 1, serial_str);
        println!("     Bus {:03} Device {:03}", device.bus, device.address);
    }

    Ok(())
}

fn cmd_curve(config_path: Option<PathBuf>, channel_str: &str) -> Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let channel: Channel = channel_str.parse()?;
    let config = DaemonConfig::load(&path).context("Failed to load config")?;
    let curve = config.curves.get(channel);

    println!("{} curve from {}:\n", channel, path.display());
    println!("  {:>6} | {:>5}", "Temp", "Duty");
    println!("  {}", "─".repeat(16));
    for temp in (0..=100).step_by(5) {
        println!("  {:>4}°C | {:>4}%", temp, curve.duty_at(temp));
    }

    Ok(())
}
