//! Prometheus scrape endpoint.

#[cfg(feature = "prometheus")]
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

#[cfg(feature = "prometheus")]
use crate::state::AppState;

/// Metrics in Prometheus text format. Unauthenticated so scrapers can reach
/// it without the API token.
#[cfg(feature = "prometheus")]
pub async fn prometheus_metrics_handler(State(state): State<AppState>) -> Response {
    match state.gateway.metrics_handle.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not enabled",
        )
            .into_response(),
    }
}
