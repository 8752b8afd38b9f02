//! Transport and media seams.
//!
//! Delivery layers implement [`ChannelOutbound`] to send rule responses and
//! [`MediaStore`] to hand voice notes to the transcription workers.

pub mod error;
pub mod media;
pub mod outbound;

pub use {
    error::{Error, Result},
    media::{FsMediaStore, MediaStore},
    outbound::{ChannelOutbound, DeliveryResult, LogOutbound, RecordingOutbound, SentMessage},
};
