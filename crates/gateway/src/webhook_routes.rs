//! WhatsApp Cloud API webhook: subscription handshake and message delivery.

use std::collections::HashMap;

use {
    axum::{
        Json,
        body::Bytes,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    parley_common::types::InboundEvent,
    parley_tenants::TenantRegistry,
    parley_whatsapp::{
        ParsedMessage, SIGNATURE_HEADER, WebhookPayload, tenant_for_phone_number, verify_signature,
        verify_subscription,
    },
    secrecy::ExposeSecret,
    serde_json::json,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, http as http_metrics, labels};

use crate::{
    error::Error,
    extract::{TenantQuery, requested_tenant},
    state::AppState,
};

/// `GET /webhook`: echo `hub.challenge` when the verify token matches.
pub async fn verify_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(expected) = state.gateway.config.whatsapp.verify_token.as_deref() else {
        warn!("webhook verification attempted without a configured verify token");
        return StatusCode::FORBIDDEN.into_response();
    };
    match verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        expected,
    ) {
        Some(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge.to_string()).into_response()
        },
        None => {
            warn!("webhook verification failed");
            StatusCode::FORBIDDEN.into_response()
        },
    }
}

/// `POST /webhook`: verify, parse and dispatch every message in order.
///
/// Once the body is authentic and well formed the provider always gets a
/// 200, even when individual messages fail, so it does not redeliver the
/// whole batch.
pub async fn receive_handler(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = &state.gateway.config;

    if let Some(secret) = &config.whatsapp.app_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(&body, signature, secret.expose_secret()) {
            warn!("webhook rejected: bad signature");
            #[cfg(feature = "metrics")]
            counter!(http_metrics::WEBHOOK_REJECTED_TOTAL, labels::REASON => "signature")
                .increment(1);
            return Error::Unauthorized.into_response();
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "webhook rejected: malformed payload");
            #[cfg(feature = "metrics")]
            counter!(http_metrics::WEBHOOK_REJECTED_TOTAL, labels::REASON => "payload")
                .increment(1);
            return Error::bad_request(format!("malformed webhook payload: {e}")).into_response();
        },
    };

    let explicit = requested_tenant(&headers, &config.registry.tenant_header, &query);
    let messages = payload.messages();
    if messages.is_empty() {
        debug!("webhook carried no messages");
    }

    let mut processed = 0usize;
    let mut duplicates = 0usize;
    let mut failed = 0usize;
    for message in messages {
        let event =
            match route_message(state.gateway.registry().as_ref(), explicit.as_deref(), message)
                .await
            {
                Ok(event) => event,
                Err(e) => {
                    // Guessing the default tenant could leak the message.
                    warn!(error = %e, "webhook message not routed");
                    failed += 1;
                    continue;
                },
            };
        match state.gateway.dispatcher.dispatch(event).await {
            Ok(outcome) if outcome.is_duplicate() => duplicates += 1,
            Ok(_) => processed += 1,
            // Already logged by the dispatcher.
            Err(_) => failed += 1,
        }
    }

    Json(json!({
        "status": "ok",
        "processed": processed,
        "duplicates": duplicates,
        "failed": failed,
    }))
    .into_response()
}

/// Attach the tenant key: an explicit header or query value, else the tenant
/// that owns the receiving phone number, else none (the default tenant).
async fn route_message(
    registry: &dyn TenantRegistry,
    explicit: Option<&str>,
    message: ParsedMessage,
) -> parley_channels::Result<InboundEvent> {
    let ParsedMessage {
        phone_number_id,
        mut event,
        ..
    } = message;
    if let Some(key) = explicit {
        return Ok(event.for_tenant(key));
    }
    if let Some(phone_number_id) = phone_number_id.as_deref()
        && let Some(tenant) = tenant_for_phone_number(registry, phone_number_id).await?
    {
        event.tenant_key = Some(tenant.key.to_string());
    }
    Ok(event)
}
