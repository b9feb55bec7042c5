use thiserror::Error;

use crate::capture::frame::{PixelFormat, Roi};
use crate::capture::source::SourceProperty;
use crate::playback::PlaybackState;

/// Engine errors.
///
/// Everything the worker loops can recover from locally is reported through
/// this type on the configuring side; nothing is thrown across threads.
#[derive(Debug, Error)]
pub enum Error {
    #[error("source could not be opened: {0}")]
    SourceOpen(String),

    #[error("source read failed: {0}")]
    SourceRead(String),

    #[error("source is not open")]
    SourceClosed,

    #[error("property {0:?} is not supported by this source")]
    UnsupportedProperty(SourceProperty),

    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),

    #[error("output sink could not be opened: {0}")]
    SinkOpen(String),

    #[error("output sink write failed: {0}")]
    SinkWrite(String),

    #[error("unsupported codec {0:?}")]
    UnsupportedCodec(String),

    #[error("region of interest {roi:?} exceeds source bounds {width}x{height}")]
    InvalidRoi { roi: Roi, width: u32, height: u32 },

    #[error("invalid processing settings: {0}")]
    InvalidSettings(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("channel capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    #[error("a channel is already registered for source {0}")]
    DuplicateChannel(String),

    #[error("seek to frame {index} is out of range, source has {total} frames")]
    InvalidSeek { index: u64, total: u64 },

    #[error("{operation} is not valid while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
