//! WhatsApp Cloud API delivery layer.
//!
//! Turns webhook payloads into [`InboundEvent`](parley_common::types::InboundEvent)s
//! and rule responses into Graph API requests, using per-tenant credentials.

pub mod client;
pub mod credentials;
pub mod media;
pub mod outbound;
pub mod payload;
pub mod types;
pub mod webhook;

pub use {
    client::{GraphClient, MediaInfo},
    credentials::{CredentialSource, Credentials, tenant_for_phone_number},
    media::WhatsAppMediaStore,
    outbound::WhatsAppOutbound,
    payload::build_payload,
    types::{ParsedMessage, WebhookPayload},
    webhook::{SIGNATURE_HEADER, sign, verify_signature, verify_subscription},
};
