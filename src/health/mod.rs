//! Dependency health endpoint.
//!
//! # Data Flow
//! ```text
//! GET /health, /health/dependencies, /health/dependencies/{key}
//!     → auth.rs (bearer key, when configured)
//!     → handlers.rs
//!     → report.rs (breaker snapshots + recorder snapshots)
//! ```
//!
//! # Design Decisions
//! - Read-only: the endpoint never mutates breaker state
//! - Reports are built per request from point-in-time snapshots

pub mod auth;
pub mod handlers;
pub mod report;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::observability::recorder::MetricsRecorder;
use crate::resilience::caller::ResilientCaller;
use crate::resilience::registry::BreakerRegistry;
use self::auth::health_auth_middleware;
use self::handlers::{get_dependencies, get_dependency, get_status};
use self::report::{build_report, HealthReport};

/// Shared state for health handlers.
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<BreakerRegistry>,
    pub recorder: Arc<MetricsRecorder>,
    pub api_key: Option<Arc<str>>,
}

impl HealthState {
    pub fn new(caller: &ResilientCaller, api_key: Option<String>) -> Self {
        Self {
            registry: caller.registry().clone(),
            recorder: caller.recorder().clone(),
            api_key: api_key.map(Arc::from),
        }
    }

    pub fn report(&self) -> HealthReport {
        build_report(&self.registry, &self.recorder)
    }
}

pub fn setup_health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(get_status))
        .route("/health/dependencies", get(get_dependencies))
        .route("/health/dependencies/{key}", get(get_dependency))
        .layer(middleware::from_fn_with_state(state.clone(), health_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health router until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: HealthState,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Health endpoint starting");

    axum::serve(listener, setup_health_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Health endpoint stopped");
    Ok(())
}
