use std::error::Error as StdError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// Transport not configured for this tenant.
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// The provider answered with an error status.
    #[error("delivery rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("media not found: {media_ref}")]
    MediaNotFound { media_ref: String },

    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn media_not_found(media_ref: impl std::fmt::Display) -> Self {
        Self::MediaNotFound {
            media_ref: media_ref.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
