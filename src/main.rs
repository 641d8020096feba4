//! otel-greeter - greeting service with OpenTelemetry tracing and logging
//!
//! Serves the greeting routes until SIGINT/SIGTERM, then drains the server
//! and shuts the telemetry providers down. The exit status is non-zero if
//! any shutdown step failed.

use anyhow::Context;
use clap::Parser;
use otel_greeter::config::Config;
use otel_greeter::server::{self, Startup};
use otel_greeter::shutdown::{ShutdownCoordinator, Signals};
use otel_greeter::telemetry::{init_subscriber, StdoutExporters};
use std::path::PathBuf;
use tracing::{info, warn};

/// otel-greeter - greeting HTTP service instrumented with OpenTelemetry
#[derive(Parser, Debug)]
#[command(name = "otel-greeter")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.address
    #[arg(short, long)]
    address: Option<String>,

    /// Log filter (e.g. "info", "otel_greeter=debug"), overrides telemetry.log_filter
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };
    if let Some(address) = args.address {
        config.server.address = address;
    }
    if let Some(filter) = args.log_level {
        config.telemetry.log_filter = filter;
    }
    config.validate().context("Invalid configuration")?;

    let Startup { telemetry, server } = server::prepare(&StdoutExporters, &config)
        .await
        .context("Failed to start")?;
    init_subscriber(&telemetry, &config.telemetry)?;
    telemetry.install_global();

    info!(
        "Starting {} v{}",
        otel_greeter::SERVICE_NAME,
        otel_greeter::SERVICE_VERSION
    );
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let signals = Signals::install().context("Failed to install signal handlers")?;
    let mut handle = server.start();

    let report = ShutdownCoordinator::new(telemetry, &config)
        .run(&mut handle, signals.recv())
        .await;

    if let Err(e) = &report.drain {
        warn!("Shutdown step failed: {}", e);
    }
    for error in &report.telemetry {
        warn!("Shutdown step failed: {}", error);
    }

    std::process::exit(report.exit_code());
}
