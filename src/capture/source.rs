//! Frame source abstraction shared by live devices and files

use serde::{Deserialize, Serialize};

use crate::capture::frame::Frame;
use crate::error::Result;

/// Properties a source may expose or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceProperty {
    FrameWidth,
    FrameHeight,
    Fps,
    /// Total frames, file sources only
    FrameCount,
    /// Index of the next frame to be read, file sources only
    PosFrames,
    /// Position of the next frame in milliseconds, file sources only
    PosMsec,
}

/// Result of a successful read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// A frame producer: a camera, a file, a synthetic generator.
///
/// Errors from [`Source::read_frame`] are treated as fatal by the loop that
/// owns the source. Running out of frames is not an error and is reported as
/// [`ReadOutcome::EndOfStream`].
pub trait Source: Send {
    /// Open the source named by `identifier` (device path, file path...).
    fn open(&mut self, identifier: &str) -> Result<()>;

    fn is_opened(&self) -> bool;

    /// Read the next frame.
    fn read_frame(&mut self) -> Result<ReadOutcome>;

    /// Set a property. Seeking is `PosFrames`/`PosMsec` on file sources.
    fn set_property(&mut self, property: SourceProperty, value: f64) -> Result<()>;

    /// Current value of a property, `None` when the source does not know it.
    fn property(&self, property: SourceProperty) -> Option<f64>;

    /// Release the underlying handle. Safe to call repeatedly.
    fn release(&mut self);
}

/// Frame size and channel count a source reports once opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceGeometry {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

