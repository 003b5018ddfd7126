//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (hub loop is answering)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// GET /health/live
///
/// Kubernetes liveness probe.
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Kubernetes readiness probe.
/// Returns 200 while the hub processes commands.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.hub_stats().await {
        Some(_) => StatusCode::OK,
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
///
/// Full health status with registry counts.
pub async fn full_health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let stats = state.hub.stats().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        sessions: stats.session_count(),
        rooms: stats.room_count(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
