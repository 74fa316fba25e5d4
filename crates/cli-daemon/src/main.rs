//! CLI entry point for Reel
//!
//! Parses command line arguments, sets up logging and runs the daemon.

use clap::Parser;
use reel::{Config, Daemon};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Config file read when `--config` is not given
const DEFAULT_CONFIG: &str = "reel.toml";

/// Reel - video library daemon
#[derive(Parser, Debug)]
#[command(name = "reel")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (default: reel.toml, if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, default_value = "false")]
    debug: bool,

    /// Skip the transcoder availability check. For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

/// Load the config, falling back to defaults only for the implicit path.
fn load_config(explicit: Option<&Path>) -> Result<Config, reel::config::ConfigError> {
    match explicit {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG),
        None => {
            warn!("No {} found, using built-in defaults", DEFAULT_CONFIG);
            Ok(Config::from_env())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Reel v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::with_config(config, args.skip_checks).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "Failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };

    info!(
        host = %daemon.config.server.host,
        port = daemon.config.server.port,
        "Starting server"
    );
    if let Err(e) = daemon.run().await {
        error!(error = %e, "Daemon error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
