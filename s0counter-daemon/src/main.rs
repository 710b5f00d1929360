// s0counter - S0 pulse counter daemon
// Copyright (c) 2025 The s0counter developers
//
// Licensed under AGPL-3.0.
// See https://www.gnu.org/licenses/agpl-3.0.html for details.

//! # s0counter
//!
//! Counts S0 pulses of utility meters on GPIO lines and publishes counter
//! and rate readings over MQTT and HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the GPIO chip (requires the gpio feature)
//! s0counter --config /etc/s0counter/s0counter.yaml
//!
//! # Run without hardware, one emulated pulse per meter every 500 ms
//! s0counter --config config/s0counter.yaml --emulate --emulate-interval-ms 500
//! ```

mod app;
mod emulator;
mod error;
mod metrics;
mod publisher;
mod settings;
mod store;
mod web;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use app::{App, Hardware};
use error::DaemonError;
use settings::Settings;

/// S0 pulse counter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = "/opt/s0counter/config.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Use emulated lines with generated pulses instead of GPIO
    #[arg(long)]
    emulate: bool,

    /// Milliseconds between emulated pulses
    #[arg(long, default_value = "1000")]
    emulate_interval_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("s0counter v{}", s0counter::VERSION);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "s0counter failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), DaemonError> {
    let settings = Settings::load(&args.config)?;

    let hardware = if args.emulate {
        Hardware::Emulated {
            pulse_interval: Some(Duration::from_millis(args.emulate_interval_ms.max(1))),
        }
    } else {
        Hardware::Gpio
    };

    let app = App::start(settings, hardware).await?;
    wait_for_signal().await;
    app.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
