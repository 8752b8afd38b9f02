use {parley_common::types::TenantKey, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    /// An explicitly supplied key has no registration. Never falls back to
    /// the default tenant.
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    /// The tenant's store could not be reached within the retry budget.
    #[error("store unavailable for tenant {tenant}: {reason}")]
    StoreUnavailable { tenant: TenantKey, reason: String },

    #[error("tenant {tenant} is bound to {existing}; refusing to move it to {requested}")]
    StoreLocationImmutable {
        tenant: TenantKey,
        existing: String,
        requested: String,
    },

    #[error("no default tenant is registered")]
    NoDefaultTenant,

    #[error(transparent)]
    Common(#[from] parley_common::Error),

    #[error(transparent)]
    Store(#[from] parley_store::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn store_unavailable(tenant: &TenantKey, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            tenant: tenant.clone(),
            reason: reason.into(),
        }
    }

    /// Failures a caller may retry later without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
