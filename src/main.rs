//! Plus Monitoring
//!
//! Polling health monitor for databases, caches and message brokers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Plus Monitoring                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Probe     │───▶│    Metric    │───▶│   /metrics   │       │
//! │  │    Loops     │    │     Sink     │    │    server    │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plus_monitoring::config::{self, DEFAULT_CONFIG_PATH};
use plus_monitoring::metrics::{run_metrics_server, MetricSink, DEFAULT_METRICS_ADDR};
use plus_monitoring::{Monitor, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Plus Monitoring - health probes for databases, caches and brokers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Human readable logs instead of JSON
    #[arg(long, env = "LOG_PRETTY")]
    log_pretty: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Plus Monitoring");
    info!("  Config: {}", args.config.display());
    info!("  Metrics address: {}", args.metrics_addr);

    let loaded = config::load_services_or_empty(&args.config);

    let sink = MetricSink::new()?;
    let mut monitor = Monitor::new(sink.clone());

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_shutdown = monitor.shutdown_token();
    let metrics_sink = sink.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_sink, metrics_shutdown).await {
            error!(severity = "critical", "Metrics server error: {}", e);
        }
    });

    let report = monitor.launch(loaded.services);
    for (service, e) in &report.failed {
        error!(service = %service, "Service not started: {}", e);
    }

    monitor.run_until(shutdown_signal()).await;

    info!("Plus Monitoring shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "sqlx=warn", "lapin=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_pretty {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }
}
