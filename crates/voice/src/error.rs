use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The job queue is full. The message is marked failed.
    #[error("transcription backlog full ({capacity} queued)")]
    Backpressure { capacity: usize },

    /// The pipeline was shut down.
    #[error("transcription pipeline closed")]
    Closed,

    #[error("audio normalization failed: {0}")]
    Normalize(String),

    #[error("invalid WAV data: {0}")]
    InvalidWav(String),

    #[error("audio lasts {duration_ms}ms, limit is {max_ms}ms")]
    TooLong { duration_ms: u64, max_ms: u64 },

    #[error("speech-to-text failed: {0}")]
    Engine(String),

    #[error("empty transcript")]
    EmptyTranscript,

    #[error("transcription timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Media(#[from] parley_channels::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-friendly reason, used as a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Backpressure { .. } => "backpressure",
            Self::Closed => "closed",
            Self::Normalize(_) => "normalize",
            Self::InvalidWav(_) => "invalid_wav",
            Self::TooLong { .. } => "too_long",
            Self::Engine(_) => "engine",
            Self::EmptyTranscript => "empty",
            Self::Timeout(_) => "timeout",
            Self::Media(_) => "media",
            Self::Io(_) | Self::Json(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
