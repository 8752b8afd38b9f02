//! Convert voice notes to what the speech engine expects.

use std::{path::PathBuf, process::Stdio};

use {async_trait::async_trait, bytes::Bytes, tokio::process::Command, tracing::debug};

use crate::{
    audio::{AudioFormat, TARGET_SAMPLE_RATE},
    error::{Error, Result},
    stt::{find_binary, temp_output, write_temp_audio},
};

#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    /// Return 16 kHz mono WAV bytes.
    async fn normalize(&self, audio: Bytes, format: AudioFormat) -> Result<Bytes>;
}

/// Shells out to `ffmpeg -y -i in -ar 16000 -ac 1 out.wav`.
#[derive(Debug, Clone)]
pub struct FfmpegNormalizer {
    binary: PathBuf,
}

impl FfmpegNormalizer {
    /// Locate ffmpeg at `path` or on `PATH`.
    pub fn locate(path: Option<&str>) -> Option<Self> {
        find_binary("ffmpeg", path).map(|binary| Self { binary })
    }
}

#[async_trait]
impl AudioNormalizer for FfmpegNormalizer {
    async fn normalize(&self, audio: Bytes, format: AudioFormat) -> Result<Bytes> {
        let input = write_temp_audio(&audio, format)?;
        let output = temp_output("wav")?;
        let rate = TARGET_SAMPLE_RATE.to_string();

        let result = Command::new(&self.binary)
            .args(["-y", "-loglevel", "error", "-i"])
            .arg(input.path())
            .args(["-ar", rate.as_str(), "-ac", "1", "-f", "wav"])
            .arg(output.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Normalize(format!("failed to execute ffmpeg: {e}")))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(Error::Normalize(stderr.trim().to_string()));
        }

        let wav = tokio::fs::read(output.path()).await?;
        debug!(input_bytes = audio.len(), output_bytes = wav.len(), "audio normalized");
        Ok(Bytes::from(wav))
    }
}

/// Accepts input that is already WAV and passes it through.
#[derive(Debug, Clone, Default)]
pub struct WavPassthrough;

#[async_trait]
impl AudioNormalizer for WavPassthrough {
    async fn normalize(&self, audio: Bytes, format: AudioFormat) -> Result<Bytes> {
        match format {
            AudioFormat::Wav => Ok(audio),
            other => Err(Error::Normalize(format!(
                "no converter available for {}",
                other.extension()
            ))),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::audio::silent_wav, std::time::Duration};

    #[tokio::test]
    async fn passthrough_only_takes_wav() {
        let wav = Bytes::from(silent_wav(10, TARGET_SAMPLE_RATE));
        assert_eq!(
            WavPassthrough.normalize(wav.clone(), AudioFormat::Wav).await.unwrap(),
            wav
        );
        assert!(matches!(
            WavPassthrough.normalize(wav, AudioFormat::Ogg).await,
            Err(Error::Normalize(_))
        ));
    }

    #[tokio::test]
    async fn ffmpeg_round_trip_when_available() {
        let Some(ffmpeg) = FfmpegNormalizer::locate(None) else {
            return;
        };
        let input = Bytes::from(silent_wav(500, 44_100));
        let out = ffmpeg.normalize(input, AudioFormat::Wav).await.unwrap();
        let info = crate::audio::parse_wav(&out).unwrap();
        assert_eq!(info.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(info.channels, 1);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn ffmpeg_is_killed_when_the_caller_gives_up() {
        use crate::stt::testing;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("ffmpeg.pid");
        let binary = testing::sleeping_binary(dir.path(), "ffmpeg", &pid_file);
        let ffmpeg = FfmpegNormalizer::locate(binary.to_str()).unwrap();

        let wav = Bytes::from(silent_wav(10, TARGET_SAMPLE_RATE));
        let attempt =
            tokio::time::timeout(Duration::from_secs(1), ffmpeg.normalize(wav, AudioFormat::Wav))
                .await;
        assert!(attempt.is_err());

        let pid = testing::wait_for_pid(&pid_file).await;
        assert!(testing::wait_until_exited(pid).await, "ffmpeg {pid} outlived its caller");
    }
}
