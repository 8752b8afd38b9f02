//! Audio formats and WAV header inspection.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sample rate the speech engine expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Opus in OGG, what WhatsApp voice notes use.
    #[default]
    Ogg,
    Mp3,
    Aac,
    Amr,
    Wav,
}

impl AudioFormat {
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Ogg => "audio/ogg",
            Self::Mp3 => "audio/mpeg",
            Self::Aac => "audio/aac",
            Self::Amr => "audio/amr",
            Self::Wav => "audio/wav",
        }
    }

    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ogg => "ogg",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Amr => "amr",
            Self::Wav => "wav",
        }
    }

    /// Best guess from a MIME type such as `audio/ogg; codecs=opus`.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        match base {
            "audio/ogg" | "audio/opus" => Some(Self::Ogg),
            "audio/mpeg" | "audio/mp3" => Some(Self::Mp3),
            "audio/aac" | "audio/mp4" => Some(Self::Aac),
            "audio/amr" => Some(Self::Amr),
            "audio/wav" | "audio/x-wav" | "audio/wave" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Guess from the extension of a stored media reference.
    pub fn from_reference(media_ref: &str) -> Self {
        match media_ref.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if ext == "mp3" => Self::Mp3,
            Some(ext) if ext == "aac" || ext == "m4a" => Self::Aac,
            Some(ext) if ext == "amr" => Self::Amr,
            Some(ext) if ext == "wav" => Self::Wav,
            _ => Self::Ogg,
        }
    }
}

/// Format fields of a PCM WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub data_len: u32,
}

impl WavInfo {
    pub fn duration_ms(&self) -> u64 {
        if self.byte_rate == 0 {
            return 0;
        }
        u64::from(self.data_len) * 1000 / u64::from(self.byte_rate)
    }
}

/// Walk the RIFF chunks for `fmt ` and `data`.
pub fn parse_wav(data: &[u8]) -> Result<WavInfo> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(Error::InvalidWav("missing RIFF/WAVE header".into()));
    }
    let mut format: Option<(u16, u32, u32)> = None;
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let len = read_u32(data, pos + 4) as usize;
        let body = pos + 8;
        match id {
            b"fmt " => {
                if body + 16 > data.len() {
                    return Err(Error::InvalidWav("truncated fmt chunk".into()));
                }
                format = Some((
                    read_u16(data, body + 2),
                    read_u32(data, body + 4),
                    read_u32(data, body + 8),
                ));
            },
            b"data" => {
                let Some((channels, sample_rate, byte_rate)) = format else {
                    return Err(Error::InvalidWav("data chunk before fmt chunk".into()));
                };
                // Streaming writers leave the size at 0 or u32::MAX; trust
                // the bytes actually present.
                let available = data.len().saturating_sub(body);
                let data_len = if len == 0 || len > available {
                    available
                } else {
                    len
                };
                return Ok(WavInfo {
                    channels,
                    sample_rate,
                    byte_rate,
                    data_len: u32::try_from(data_len).unwrap_or(u32::MAX),
                });
            },
            _ => {},
        }
        // Chunks are word aligned.
        pos = body.saturating_add(len).saturating_add(len & 1);
    }
    Err(Error::InvalidWav("no data chunk".into()))
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Silent 16-bit PCM mono WAV of the given length.
pub fn silent_wav(duration_ms: u32, sample_rate: u32) -> Vec<u8> {
    let byte_rate = sample_rate * 2;
    let data_len = byte_rate / 1000 * duration_ms;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
