pub mod decoder;
pub mod frame;
pub mod memory;
pub mod pattern;
pub mod sequence;
pub mod source;
#[cfg(feature = "v4l2")]
pub mod v4l2;
pub mod worker;

pub use frame::{Frame, PixelFormat, Roi};
pub use memory::MemorySource;
pub use pattern::PatternSource;
pub use sequence::ImageSequenceSource;
pub use source::{ReadOutcome, Source, SourceGeometry, SourceProperty};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
pub use worker::{CaptureOptions, CaptureState, CaptureWorker};
