use {
    axum::{
        body::Body,
        extract::State,
        http::{Request, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    secrecy::ExposeSecret,
};

use crate::{error::Error, state::AppState};

/// Guards `/api/*` with `Authorization: Bearer <server.api_token>`. Without
/// a configured token every request passes.
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.gateway.config.server.api_token else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token.as_bytes(), expected.expose_secret().as_bytes()) => {
            next.run(request).await
        },
        _ => Error::Unauthorized.into_response(),
    }
}

fn tokens_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
