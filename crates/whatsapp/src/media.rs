//! Voice notes arrive as Cloud API media ids; fetch them on first use and
//! keep a copy in the tenant's media directory.

use std::sync::Arc;

use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_channels::{FsMediaStore, MediaStore, Result},
    parley_common::types::TenantKey,
    tracing::debug,
};

use crate::{client::GraphClient, credentials::CredentialSource};

pub struct WhatsAppMediaStore {
    cache: FsMediaStore,
    client: GraphClient,
    credentials: Arc<CredentialSource>,
}

impl WhatsAppMediaStore {
    pub fn new(cache: FsMediaStore, client: GraphClient, credentials: Arc<CredentialSource>) -> Self {
        Self {
            cache,
            client,
            credentials,
        }
    }
}

#[async_trait]
impl MediaStore for WhatsAppMediaStore {
    async fn store(&self, tenant: &TenantKey, data: Bytes, extension: &str) -> Result<String> {
        self.cache.store(tenant, data, extension).await
    }

    async fn fetch(&self, tenant: &TenantKey, media_ref: &str) -> Result<Bytes> {
        if self.cache.contains(tenant, media_ref).await {
            return self.cache.fetch(tenant, media_ref).await;
        }
        let creds = self.credentials.for_tenant(tenant).await?;
        let info = self.client.media_info(&creds, media_ref).await?;
        let data = self.client.download(&creds, &info.url).await?;
        debug!(
            tenant = %tenant,
            media_ref,
            mime_type = ?info.mime_type,
            bytes = data.len(),
            "downloaded whatsapp media"
        );
        self.cache.store_named(tenant, media_ref, &data).await?;
        Ok(data)
    }
}
