//! whisper.cpp (`whisper-cli`) provider.
//!
//! Expects 16 kHz mono WAV input, which is what the normalizer produces.

use std::{path::PathBuf, process::Stdio};

use {async_trait::async_trait, serde::Deserialize, tokio::process::Command, tracing::debug};

use super::{SttProvider, TranscribeRequest, Transcript, cli_utils};
use crate::error::{Error, Result};

const BINARY_NAME: &str = "whisper-cli";

/// Older builds ship the binary under this name.
const ALT_BINARY_NAME: &str = "whisper";

#[derive(Clone, Debug, Default)]
pub struct WhisperCliStt {
    binary_path: Option<String>,
    model_path: Option<String>,
    language: Option<String>,
}

impl WhisperCliStt {
    #[must_use]
    pub fn new(
        binary_path: Option<String>,
        model_path: Option<String>,
        language: Option<String>,
    ) -> Self {
        Self {
            binary_path,
            model_path,
            language,
        }
    }

    fn find_binary(&self) -> Option<PathBuf> {
        cli_utils::find_binary(BINARY_NAME, self.binary_path.as_deref())
            .or_else(|| cli_utils::find_binary(ALT_BINARY_NAME, None))
    }

    fn model(&self) -> Result<PathBuf> {
        self.model_path
            .as_deref()
            .map(cli_utils::expand_tilde)
            .filter(|p| p.exists())
            .ok_or_else(|| Error::Engine("whisper-cli model not configured or not found".into()))
    }
}

#[async_trait]
impl SttProvider for WhisperCliStt {
    fn id(&self) -> &'static str {
        "whisper-cli"
    }

    fn is_configured(&self) -> bool {
        self.find_binary().is_some() && cli_utils::model_exists(self.model_path.as_deref())
    }

    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        let binary = self
            .find_binary()
            .ok_or_else(|| Error::Engine("whisper-cli binary not found in PATH".into()))?;
        let model = self.model()?;
        let input = cli_utils::write_temp_audio(&request.audio, request.format)?;

        let mut cmd = Command::new(&binary);
        cmd.arg("-m").arg(&model);
        cmd.arg("-f").arg(input.path());
        cmd.arg("-oj").arg("--no-prints");
        // `-oj` writes JSON next to the input unless told otherwise.
        let out_base = input.path().with_extension("");
        cmd.arg("-of").arg(&out_base);
        if let Some(lang) = request.language.as_ref().or(self.language.as_ref()) {
            cmd.arg("-l").arg(lang);
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Engine(format!("failed to execute whisper-cli: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Engine(format!("whisper-cli failed: {}", stderr.trim())));
        }

        let json_path = out_base.with_extension("json");
        let json = match tokio::fs::read(&json_path).await {
            Ok(bytes) => {
                let _ = tokio::fs::remove_file(&json_path).await;
                bytes
            },
            Err(_) => output.stdout,
        };
        let response: WhisperCliResponse = serde_json::from_slice(&json)?;
        let transcript = response.into_transcript();
        debug!(chars = transcript.text.len(), "whisper-cli finished");
        Ok(transcript)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperCliResponse {
    #[serde(default)]
    result: WhisperCliResult,
    #[serde(default)]
    transcription: Vec<WhisperCliSegment>,
}

#[derive(Debug, Default, Deserialize)]
struct WhisperCliResult {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperCliSegment {
    #[serde(default)]
    text: String,
}

impl WhisperCliResponse {
    fn into_transcript(self) -> Transcript {
        let text = self
            .transcription
            .iter()
            .map(|seg| seg.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Transcript {
            text,
            language: self.result.language,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::audio::AudioFormat, bytes::Bytes};

    #[test]
    fn not_configured_without_model() {
        let provider = WhisperCliStt::default();
        assert_eq!(provider.id(), "whisper-cli");
        assert!(!provider.is_configured());
    }

    #[test]
    fn segments_are_joined() {
        let json = r#"{
            "result": {"language": "es"},
            "transcription": [
                {"text": " Hola,"},
                {"text": "   "},
                {"text": " quiero pagar mi factura"}
            ]
        }"#;
        let response: WhisperCliResponse = serde_json::from_str(json).unwrap();
        let t = response.into_transcript();
        assert_eq!(t.text, "Hola, quiero pagar mi factura");
        assert_eq!(t.language.as_deref(), Some("es"));
    }

    #[test]
    fn minimal_output_parses() {
        let response: WhisperCliResponse =
            serde_json::from_str(r#"{"transcription": [{"text": "sí"}]}"#).unwrap();
        assert!(response.result.language.is_none());
        assert_eq!(response.into_transcript().text, "sí");
    }

    #[tokio::test]
    async fn transcribe_without_model_fails() {
        let provider = WhisperCliStt::new(None, Some("/no/such/model.bin".into()), None);
        let err = provider
            .transcribe(TranscribeRequest {
                audio: Bytes::from_static(b"RIFF"),
                format: AudioFormat::Wav,
                language: Some("es".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn engine_process_is_killed_on_timeout() {
        use {crate::stt::testing, std::time::Duration};

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("whisper.pid");
        let binary = testing::sleeping_binary(dir.path(), "whisper-cli", &pid_file);
        let model = dir.path().join("ggml-base.bin");
        std::fs::write(&model, b"model").unwrap();
        let provider = WhisperCliStt::new(
            binary.to_str().map(str::to_string),
            model.to_str().map(str::to_string),
            None,
        );

        let request = TranscribeRequest {
            audio: Bytes::from_static(b"RIFF"),
            format: AudioFormat::Wav,
            language: None,
        };
        let attempt =
            tokio::time::timeout(Duration::from_secs(1), provider.transcribe(request)).await;
        assert!(attempt.is_err());

        let pid = testing::wait_for_pid(&pid_file).await;
        assert!(testing::wait_until_exited(pid).await, "whisper-cli {pid} outlived its caller");
    }
}
