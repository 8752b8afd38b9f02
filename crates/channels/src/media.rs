//! Tenant-scoped media storage.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_common::types::TenantKey,
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::error::{Error, Result};

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist `data` and return the reference to fetch it with.
    async fn store(&self, tenant: &TenantKey, data: Bytes, extension: &str) -> Result<String>;

    async fn fetch(&self, tenant: &TenantKey, media_ref: &str) -> Result<Bytes>;
}

/// Files under `<root>/<tenant>/`, named by content hash.
#[derive(Debug, Clone)]
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tenant_dir(&self, tenant: &TenantKey) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    /// Path for `media_ref`, rejecting anything that could leave the tenant
    /// directory.
    pub fn path_for(&self, tenant: &TenantKey, media_ref: &str) -> Result<PathBuf> {
        let valid = !media_ref.is_empty()
            && media_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !media_ref.starts_with('.');
        if !valid {
            return Err(Error::invalid_input(format!("bad media reference: {media_ref:?}")));
        }
        Ok(self.tenant_dir(tenant).join(media_ref))
    }

    /// Write under an explicit name, e.g. a provider media id.
    pub async fn store_named(&self, tenant: &TenantKey, media_ref: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(tenant, media_ref)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(tenant = %tenant, media_ref, bytes = data.len(), "media stored");
        Ok(())
    }

    pub async fn contains(&self, tenant: &TenantKey, media_ref: &str) -> bool {
        match self.path_for(tenant, media_ref) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn store(&self, tenant: &TenantKey, data: Bytes, extension: &str) -> Result<String> {
        let digest = hex::encode(Sha256::digest(&data));
        let extension = extension.trim_start_matches('.');
        let media_ref = if extension.is_empty() {
            digest
        } else {
            format!("{digest}.{extension}")
        };
        self.store_named(tenant, &media_ref, &data).await?;
        Ok(media_ref)
    }

    async fn fetch(&self, tenant: &TenantKey, media_ref: &str) -> Result<Bytes> {
        let path = self.path_for(tenant, media_ref)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::media_not_found(media_ref))
            },
            Err(e) => Err(e.into()),
        }
    }
}
