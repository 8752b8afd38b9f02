//! Voice-note transcription.
//!
//! [`TranscriptionPipeline`] runs a fixed pool of workers that normalize
//! audio with ffmpeg and hand it to a [`SttProvider`]. Outcomes are reported
//! through a [`TranscriptSink`]; nothing here touches conversation state.

pub mod audio;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod stt;

pub use {
    audio::{AudioFormat, TARGET_SAMPLE_RATE, WavInfo, parse_wav},
    error::{Error, Result},
    normalize::{AudioNormalizer, FfmpegNormalizer, WavPassthrough},
    pipeline::{
        PipelineDeps, PipelineOptions, TranscriptSink, TranscriptionJob, TranscriptionPipeline,
    },
    stt::{SttProvider, TranscribeRequest, Transcript, WhisperCliStt},
};
