//! CLI entry point for the USB random video player
//!
//! Parses command line arguments, sets up logging and starts the daemon.

use clap::Parser;
use rpi_random_player::{diagnose_keyboard, Config, Daemon, DaemonError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// USB Random Video Player - plays a random video from USB storage on key press
#[derive(Parser, Debug)]
#[command(name = "rpi-random-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml); defaults are used if it is missing
    #[arg(short, long, default_value = "/etc/rpi-random-player/config.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// List usable keyboards and log key presses, then exit
    #[arg(long)]
    diagnose_keyboard: bool,

    /// How long --diagnose-keyboard listens, in seconds
    #[arg(long, default_value_t = 20)]
    diagnose_seconds: u64,

    /// Skip startup checks (mpv, ffprobe)
    #[arg(long)]
    skip_checks: bool,
}

/// RUST_LOG wins over --debug when set.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    info!("USB random video player starting");
    info!("Config file: {}", args.config.display());

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.diagnose_keyboard {
        let listen_for = Duration::from_secs(args.diagnose_seconds);
        return match diagnose_keyboard(&config.input, listen_for).await {
            Ok(count) => {
                info!("Keyboard diagnostics finished ({} device(s))", count);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Keyboard diagnostics failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let daemon = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config)
    } else {
        Daemon::new(config)
    };

    match daemon.run().await {
        Ok(()) => {
            info!("Stopped");
            ExitCode::SUCCESS
        }
        Err(DaemonError::Input(e)) => {
            error!("Keyboard input setup failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Daemon error: {}", e);
            ExitCode::FAILURE
        }
    }
}
