//! Speech-to-text provider abstraction.

mod cli_utils;
mod whisper_cli;

#[cfg(all(test, target_os = "linux"))]
pub(crate) use cli_utils::testing;
pub(crate) use cli_utils::{find_binary, temp_output, write_temp_audio};
pub use whisper_cli::WhisperCliStt;

use {
    async_trait::async_trait,
    bytes::Bytes,
    serde::{Deserialize, Serialize},
};

use crate::{audio::AudioFormat, error::Result};

#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Bytes,
    pub format: AudioFormat,
    /// ISO 639-1 language hint.
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Detected language, when the engine reports it.
    pub language: Option<String>,
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    /// Provider identifier (e.g. "whisper-cli").
    fn id(&self) -> &'static str;

    /// Whether binaries and models are in place.
    fn is_configured(&self) -> bool;

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript>;
}
