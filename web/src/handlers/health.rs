//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether the process is
//! alive and whether it should receive traffic.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tutoring_runtime::HealthCheck;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Liveness check.
///
/// Does not touch the database.
///
/// ```text
/// GET /health
/// {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

/// Readiness check: the store must accept a transaction.
///
/// - 200 OK: healthy
/// - 503 Service Unavailable: unhealthy
///
/// ```text
/// GET /health/ready
/// {"component":"store","status":"healthy"}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthCheck>) {
    let health = state.services.health().await;

    let status = if health.status.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(message = ?health.message, "Readiness check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}
