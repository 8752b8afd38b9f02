//! Per-tenant Cloud API credentials.
//!
//! A tenant's `metadata.whatsapp` object wins; the `[whatsapp]` config section
//! fills whatever the tenant leaves out.

use std::sync::Arc;

use {
    parley_channels::{Error, Result},
    parley_common::types::TenantKey,
    parley_config::WhatsAppConfig,
    parley_tenants::{Tenant, TenantRegistry},
    secrecy::{ExposeSecret, Secret},
};

pub const METADATA_PHONE_NUMBER_ID: &str = "whatsapp.phone_number_id";
pub const METADATA_ACCESS_TOKEN: &str = "whatsapp.access_token";

#[derive(Clone)]
pub struct Credentials {
    pub phone_number_id: String,
    pub access_token: Secret<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

pub struct CredentialSource {
    registry: Arc<dyn TenantRegistry>,
    fallback_phone_number_id: Option<String>,
    fallback_token: Option<Secret<String>>,
}

impl CredentialSource {
    pub fn new(registry: Arc<dyn TenantRegistry>, config: &WhatsAppConfig) -> Self {
        Self {
            registry,
            fallback_phone_number_id: config.phone_number_id.clone(),
            fallback_token: config.access_token.clone(),
        }
    }

    pub async fn for_tenant(&self, key: &TenantKey) -> Result<Credentials> {
        let tenant = self
            .registry
            .get(key)
            .await
            .map_err(|e| Error::external("tenant lookup", e))?
            .ok_or_else(|| Error::unavailable(format!("tenant {key} is not registered")))?;
        self.resolve(&tenant)
    }

    pub fn resolve(&self, tenant: &Tenant) -> Result<Credentials> {
        let phone_number_id = tenant
            .metadata_str(METADATA_PHONE_NUMBER_ID)
            .map(str::to_string)
            .or_else(|| self.fallback_phone_number_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::unavailable(format!("no WhatsApp phone number id for tenant {}", tenant.key))
            })?;
        let access_token = tenant
            .metadata_str(METADATA_ACCESS_TOKEN)
            .map(|t| Secret::new(t.to_string()))
            .or_else(|| self.fallback_token.clone())
            .filter(|t| !t.expose_secret().is_empty())
            .ok_or_else(|| {
                Error::unavailable(format!("no WhatsApp access token for tenant {}", tenant.key))
            })?;
        Ok(Credentials {
            phone_number_id,
            access_token,
        })
    }
}

/// Tenant whose metadata names `phone_number_id`, for webhooks that arrive
/// without an explicit tenant key. `None` means no tenant claims the number; a
/// registry failure is an error, never a silent miss.
pub async fn tenant_for_phone_number(
    registry: &dyn TenantRegistry,
    phone_number_id: &str,
) -> Result<Option<Tenant>> {
    registry
        .find_by_metadata(METADATA_PHONE_NUMBER_ID, phone_number_id)
        .await
        .map_err(|e| Error::external("tenant lookup by phone number", e))
}
