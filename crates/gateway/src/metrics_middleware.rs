//! HTTP request counter.

#[cfg(feature = "metrics")]
use {
    axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response},
    parley_metrics::{counter, http as http_metrics, labels},
};

/// Counts requests by matched route template and status. Route templates
/// keep label cardinality bounded; unmatched paths share one label.
#[cfg(feature = "metrics")]
pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ROUTE => route,
        labels::STATUS => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}
