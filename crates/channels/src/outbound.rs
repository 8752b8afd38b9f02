use std::sync::Mutex;

use {
    async_trait::async_trait,
    parley_common::types::{ResponseSpec, TenantKey},
    serde::Serialize,
    tracing::info,
};

use crate::error::{Error, Result};

/// What the transport reported for one delivered response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    /// Provider id of the sent message, when the transport returns one.
    pub provider_message_id: Option<String>,
}

/// Sends responses to a contact. Failures are reported to the caller, which
/// logs them; they never undo a committed step transition.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    /// Transport identifier (e.g. "whatsapp").
    fn id(&self) -> &str;

    async fn send(
        &self,
        tenant: &TenantKey,
        to: &str,
        response: &ResponseSpec,
    ) -> Result<DeliveryResult>;
}

/// Logs responses instead of sending them. Used when no transport is
/// configured.
#[derive(Debug, Default)]
pub struct LogOutbound;

#[async_trait]
impl ChannelOutbound for LogOutbound {
    fn id(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        tenant: &TenantKey,
        to: &str,
        response: &ResponseSpec,
    ) -> Result<DeliveryResult> {
        info!(
            tenant = %tenant,
            contact = to,
            kind = response.kind().as_str(),
            body = response.body(),
            "outbound (no transport configured)"
        );
        Ok(DeliveryResult::default())
    }
}

/// A response captured by [`RecordingOutbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub tenant: TenantKey,
    pub to: String,
    pub response: ResponseSpec,
}

/// Keeps every response in memory. Optionally fails every send.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send records the message and then returns an error.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Bodies sent to `to`, in order.
    pub fn bodies_to(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == to)
            .map(|m| m.response.body().to_string())
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

#[async_trait]
impl ChannelOutbound for RecordingOutbound {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        tenant: &TenantKey,
        to: &str,
        response: &ResponseSpec,
    ) -> Result<DeliveryResult> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                tenant: tenant.clone(),
                to: to.to_string(),
                response: response.clone(),
            });
        }
        if self.fail {
            return Err(Error::unavailable("recording outbound set to fail"));
        }
        Ok(DeliveryResult::default())
    }
}
