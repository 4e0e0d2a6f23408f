use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::health::report::{DependencyHealth, HealthReport, OverallStatus};
use crate::health::HealthState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: OverallStatus,
    pub dependencies: usize,
    pub unhealthy: Vec<String>,
}

pub async fn get_status(State(state): State<HealthState>) -> Json<SystemStatus> {
    let report = state.report();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: report.status,
        dependencies: report.dependencies.len(),
        unhealthy: report.unhealthy().into_iter().map(String::from).collect(),
    })
}

pub async fn get_dependencies(State(state): State<HealthState>) -> Json<HealthReport> {
    Json(state.report())
}

pub async fn get_dependency(
    State(state): State<HealthState>,
    Path(key): Path<String>,
) -> Result<Json<DependencyHealth>, StatusCode> {
    state
        .report()
        .dependencies
        .remove(&key)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
