use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use mealsync_shared::errors::AppError;
use mealsync_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let store = match state.service.store().health_check().await {
        Ok(()) => HealthCheck::healthy("store"),
        Err(e) => HealthCheck::unhealthy("store", e.to_string()),
    };
    let gateway = match state.service.gateway().stats().await {
        Ok(_) => HealthCheck::healthy("gateway"),
        Err(e) => HealthCheck::unhealthy("gateway", e.to_string()),
    };

    let health = HealthResponse::healthy(crate::SERVICE_NAME, env!("CARGO_PKG_VERSION"))
        .with_checks(vec![store, gateway]);
    let status = match health.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(health))
}

/// Prometheus scrape endpoint, with gateway occupancy sampled at scrape time.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| AppError::not_found("metrics exporter is not installed"))?;

    if let Ok(stats) = state.service.gateway().stats().await {
        metrics::gauge!("chat_gateway_connections").set(stats.connections as f64);
        metrics::gauge!("chat_gateway_rooms").set(stats.rooms as f64);
        metrics::gauge!("chat_gateway_admins").set(stats.admins as f64);
    }

    Ok(handle.render())
}
