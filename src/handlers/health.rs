//! Liveness/readiness endpoint with a database probe.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

use crate::db;
use crate::handlers::AppState;

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub uptime_secs: u64,
    pub database: ComponentHealth,
}

pub fn health_router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// Report process liveness and database reachability.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let started = Instant::now();
    let database = match db::check_connection(state.db.as_ref()).await {
        Ok(()) => ComponentHealth {
            status: ComponentStatus::Up,
            message: "connected".to_string(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        },
        Err(err) => ComponentHealth {
            status: ComponentStatus::Down,
            message: err.response_message(),
            latency_ms: None,
        },
    };

    let healthy = matches!(database.status, ComponentStatus::Up);
    let body = HealthResponse {
        status: if healthy {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: START_TIME
            .get()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0),
        database,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
