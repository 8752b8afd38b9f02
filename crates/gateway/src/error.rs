use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    thiserror::Error,
    tracing::warn,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error(transparent)]
    Tenants(#[from] parley_tenants::Error),

    #[error(transparent)]
    Session(#[from] parley_sessions::Error),

    #[error(transparent)]
    Store(#[from] parley_store::Error),

    #[error(transparent)]
    Rules(#[from] parley_rules::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn store_status(error: &parley_store::Error) -> StatusCode {
        match error {
            parley_store::Error::Common(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            e if e.is_connection_error() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn status(&self) -> StatusCode {
        use parley_tenants::Error as T;
        match self {
            Self::BadRequest(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Tenants(e) => match e {
                T::TenantNotFound(_) | T::NoDefaultTenant => StatusCode::NOT_FOUND,
                T::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                T::StoreLocationImmutable { .. } => StatusCode::CONFLICT,
                T::Common(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
                T::Store(e) => Self::store_status(e),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Session(e) => match e {
                parley_sessions::Error::Store(e) => Self::store_status(e),
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::Store(e) | Self::Rules(parley_rules::Error::Store(e)) => Self::store_status(e),
        }
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        use parley_tenants::Error as T;
        match self {
            Self::BadRequest(_) | Self::Json(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Tenants(T::TenantNotFound(_) | T::NoDefaultTenant) => "tenant_not_found",
            Self::Tenants(T::StoreUnavailable { .. }) => "store_unavailable",
            Self::Tenants(_) => "registry",
            Self::Session(parley_sessions::Error::LockTimeout { .. }) => "lock_timeout",
            Self::Session(parley_sessions::Error::Timeout { .. }) => "timeout",
            Self::Session(_) | Self::Store(_) | Self::Rules(_) => "store",
        }
    }

    /// The tenant's store connection failed and its cached handle should be
    /// dropped.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            Self::Store(e)
            | Self::Rules(parley_rules::Error::Store(e))
            | Self::Session(parley_sessions::Error::Store(e))
            | Self::Tenants(parley_tenants::Error::Store(e)) => e.is_connection_error(),
            _ => false,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, reason = self.reason(), "request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.to_string(), "reason": self.reason() })),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
