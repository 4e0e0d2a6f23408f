//! upstream-guard daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   host application
//!   ┌───────────────────────────────────────────────────────────┐
//!   │  route handler ──▶ ResilientCaller::call(key, work, ...)  │
//!   │                        │                                  │
//!   │          ┌─────────────┼──────────────┐                   │
//!   │          ▼             ▼              ▼                   │
//!   │   BreakerRegistry   timeouts      MetricsRecorder         │      database API
//!   │   (per key breaker) + backoff     (per key counters) ─────┼──▶  payment gateway
//!   │                                                           │      AI providers
//!   │  ┌─────────────────────────────────────────────────────┐  │
//!   │  │ health endpoint (/health/dependencies)  prometheus  │  │
//!   │  └─────────────────────────────────────────────────────┘  │
//!   └───────────────────────────────────────────────────────────┘
//! ```
//!
//! The daemon loads the configuration, pre-registers every configured
//! dependency and serves its health report and Prometheus metrics until it
//! receives a shutdown signal.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use upstream_guard::config::{load_config, GuardConfig};
use upstream_guard::health::{self, HealthState};
use upstream_guard::lifecycle::{signals, Shutdown};
use upstream_guard::observability::{logging, metrics};
use upstream_guard::ResilientCaller;

#[derive(Parser)]
#[command(name = "upstream-guard", version)]
#[command(about = "Dependency circuit breaker and retry layer with a health endpoint")]
struct Args {
    /// Path to a TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!("upstream-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        dependencies = config.dependencies.len(),
        failure_threshold = config.breaker.failure_threshold,
        recovery_timeout_ms = config.breaker.recovery_timeout_ms,
        max_attempts = config.retries.max_attempts,
        call_timeout_ms = config.timeouts.call_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let caller = Arc::new(ResilientCaller::from_config(&config));
    for key in caller.registry().keys() {
        tracing::info!(dependency = %key, "Dependency registered");
    }

    let shutdown = Shutdown::new();
    let server = if config.health.enabled {
        let listener = TcpListener::bind(&config.health.bind_address).await?;
        let state = HealthState::new(&caller, config.health.api_key.clone());
        Some(tokio::spawn(health::serve(listener, state, shutdown.token())))
    } else {
        tracing::info!("Health endpoint disabled");
        None
    };

    signals::wait_for_shutdown_signal().await?;
    shutdown.trigger();

    if let Some(server) = server {
        server.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
