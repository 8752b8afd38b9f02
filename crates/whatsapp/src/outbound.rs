use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_channels::{ChannelOutbound, DeliveryResult, Result},
    parley_common::types::{ResponseSpec, TenantKey},
    tracing::warn,
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, labels, outbound as outbound_metrics};

use crate::{client::GraphClient, credentials::CredentialSource, payload::build_payload};

/// Sends rule responses through the Cloud API with the tenant's own
/// credentials.
pub struct WhatsAppOutbound {
    client: GraphClient,
    credentials: Arc<CredentialSource>,
}

impl WhatsAppOutbound {
    pub fn new(client: GraphClient, credentials: Arc<CredentialSource>) -> Self {
        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl ChannelOutbound for WhatsAppOutbound {
    fn id(&self) -> &str {
        "whatsapp"
    }

    async fn send(
        &self,
        tenant: &TenantKey,
        to: &str,
        response: &ResponseSpec,
    ) -> Result<DeliveryResult> {
        let creds = self.credentials.for_tenant(tenant).await?;
        let payload = build_payload(to, response);
        match self.client.send_message(&creds, &payload).await {
            Ok(provider_message_id) => {
                #[cfg(feature = "metrics")]
                counter!(
                    outbound_metrics::SENT_TOTAL,
                    labels::TENANT => tenant.to_string(),
                    labels::KIND => response.kind().as_str()
                )
                .increment(1);
                Ok(DeliveryResult {
                    provider_message_id,
                })
            },
            Err(e) => {
                warn!(tenant = %tenant, contact = to, error = %e, "whatsapp send failed");
                #[cfg(feature = "metrics")]
                counter!(outbound_metrics::FAILED_TOTAL, labels::TENANT => tenant.to_string())
                    .increment(1);
                Err(e)
            },
        }
    }
}
