//! Recording of processed frames to an output sink

use std::path::PathBuf;
use std::sync::Arc;

use image::ColorType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::frame::Frame;
use crate::error::{Error, Result};

/// Codec a new recording uses unless told otherwise
pub const DEFAULT_CODEC: &str = "PNG ";

/// Parameters a sink is opened with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub path: PathBuf,
    /// FourCC, e.g. `"MJPG"`
    pub codec: String,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub is_color: bool,
}

impl SinkSpec {
    pub fn channels(&self) -> u8 {
        if self.is_color {
            3
        } else {
            1
        }
    }
}

/// Something frames can be written to.
pub trait OutputSink: Send {
    fn open(&mut self, spec: &SinkSpec) -> Result<()>;

    fn is_opened(&self) -> bool;

    /// Write one frame. Its size and channel count must match the `SinkSpec` the
    /// sink was opened with.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close. Safe to call repeatedly.
    fn release(&mut self);
}

fn check_shape(spec: &SinkSpec, frame: &Frame) -> Result<()> {
    if frame.width != spec.width || frame.height != spec.height || frame.channels != spec.channels() {
        return Err(Error::SinkWrite(format!(
            "frame is {}x{}x{}, sink expects {}x{}x{}",
            frame.width,
            frame.height,
            frame.channels,
            spec.width,
            spec.height,
            spec.channels()
        )));
    }
    Ok(())
}

/// Writes numbered stills into a directory, one file per frame.
#[derive(Debug, Default)]
pub struct ImageSequenceSink {
    spec: Option<SinkSpec>,
    extension: &'static str,
    written: u64,
}

impl ImageSequenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// File extension for a FourCC.
    pub fn extension_for(codec: &str) -> Result<&'static str> {
        match codec.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok("png"),
            "MJPG" | "JPEG" => Ok("jpg"),
            "BMP" => Ok("bmp"),
            _ => Err(Error::UnsupportedCodec(codec.to_string())),
        }
    }
}

impl OutputSink for ImageSequenceSink {
    fn open(&mut self, spec: &SinkSpec) -> Result<()> {
        self.release();
        let extension = Self::extension_for(&spec.codec)?;
        if spec.width == 0 || spec.height == 0 {
            return Err(Error::SinkOpen(format!(
                "invalid size {}x{}",
                spec.width, spec.height
            )));
        }
        std::fs::create_dir_all(&spec.path)
            .map_err(|e| Error::SinkOpen(format!("{}: {e}", spec.path.display())))?;
        info!(
            "Recording to {} as {extension}: {}x{} @ {:.1} fps",
            spec.path.display(),
            spec.width,
            spec.height,
            spec.fps
        );
        self.spec = Some(spec.clone());
        self.extension = extension;
        self.written = 0;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.spec.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let spec = self.spec.as_ref().ok_or_else(|| Error::SinkWrite("sink is not open".into()))?;
        check_shape(spec, frame)?;
        let color = if frame.is_color() {
            ColorType::Rgb8
        } else {
            ColorType::L8
        };
        let path = spec
            .path
            .join(format!("frame_{:06}.{}", self.written, self.extension));
        image::save_buffer(&path, &frame.data, frame.width, frame.height, color)
            .map_err(|e| Error::SinkWrite(format!("{}: {e}", path.display())))?;
        self.written += 1;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(spec) = self.spec.take() {
            debug!("Closed {} after {} frames", spec.path.display(), self.written);
        }
    }
}

/// Keeps written frames in memory. Clones share the same buffer, so a
/// handle kept outside the recorder sees what was written.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    spec: Option<SinkSpec>,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl OutputSink for MemorySink {
    fn open(&mut self, spec: &SinkSpec) -> Result<()> {
        if spec.width == 0 || spec.height == 0 {
            return Err(Error::SinkOpen(format!(
                "invalid size {}x{}",
                spec.width, spec.height
            )));
        }
        self.spec = Some(spec.clone());
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.spec.is_some()
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let spec = self.spec.as_ref().ok_or_else(|| Error::SinkWrite("sink is not open".into()))?;
        check_shape(spec, frame)?;
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn release(&mut self) {
        self.spec = None;
    }
}

/// Builds a fresh sink for every recording.
pub type SinkFactory = Box<dyn Fn() -> Box<dyn OutputSink> + Send + Sync>;

struct Recording {
    sink: Box<dyn OutputSink>,
    spec: SinkSpec,
    side_by_side: bool,
    written: u64,
}

/// Recording state shared between the configuring thread and a worker loop.
/// The sink is only touched under the lock, and the lock is only held while
/// the sink opens, writes or closes.
pub struct Recorder {
    factory: SinkFactory,
    active: Mutex<Option<Recording>>,
}

impl Recorder {
    pub fn new(factory: SinkFactory) -> Self {
        Self {
            factory,
            active: Mutex::new(None),
        }
    }

    /// Recorder writing stills through [`ImageSequenceSink`].
    pub fn image_sequence() -> Self {
        Self::new(Box::new(|| Box::new(ImageSequenceSink::new())))
    }

    /// Open a new sink, closing any recording in progress. With
    /// `side_by_side` each written frame is the processed frame followed by
    /// the original, so `spec.width` must already be doubled.
    pub fn start(&self, spec: SinkSpec, side_by_side: bool) -> Result<()> {
        let mut sink = (self.factory)();
        sink.open(&spec)?;
        let mut active = self.active.lock();
        if let Some(mut previous) = active.take() {
            warn!("Replacing recording to {}", previous.spec.path.display());
            previous.sink.release();
        }
        *active = Some(Recording {
            sink,
            spec,
            side_by_side,
            written: 0,
        });
        Ok(())
    }

    /// Close the sink. Returns the number of frames written.
    pub fn stop(&self) -> Option<u64> {
        let mut recording = self.active.lock().take()?;
        recording.sink.release();
        info!(
            "Recording to {} stopped after {} frames",
            recording.spec.path.display(),
            recording.written
        );
        Some(recording.written)
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn is_side_by_side(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|r| r.side_by_side)
    }

    pub fn frames_written(&self) -> u64 {
        self.active.lock().as_ref().map_or(0, |r| r.written)
    }

    /// Write a frame if recording. Frames are converted to the sink's channel
    /// count first. Returns the running count, `None` when idle.
    pub fn write(&self, processed: &Frame, original: Option<&Frame>) -> Result<Option<u64>> {
        let mut active = self.active.lock();
        let Some(recording) = active.as_mut() else {
            return Ok(None);
        };
        let left = processed.to_channels(recording.spec.channels());
        let frame = match (recording.side_by_side, original) {
            (true, Some(original)) => Frame::hconcat(&left, original)?,
            (true, None) => {
                return Err(Error::SinkWrite("side-by-side recording needs the original frame".into()))
            }
            (false, _) => left,
        };
        recording.sink.write_frame(&frame)?;
        recording.written += 1;
        Ok(Some(recording.written))
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(width: u32, height: u32, is_color: bool) -> SinkSpec {
        SinkSpec {
            path: PathBuf::from("unused"),
            codec: "MJPG".into(),
            fps: 30.0,
            width,
            height,
            is_color,
        }
    }

    fn memory_recorder() -> (Recorder, MemorySink) {
        let sink = MemorySink::new();
        let handle = sink.clone();
        let recorder = Recorder::new(Box::new(move || Box::new(sink.clone())));
        (recorder, handle)
    }

    #[test]
    fn idle_recorder_writes_nothing() {
        let (recorder, sink) = memory_recorder();
        assert_eq!(recorder.write(&Frame::new(4, 4, 3), None).unwrap(), None);
        assert!(sink.is_empty());
        assert_eq!(recorder.stop(), None);
    }

    #[test]
    fn side_by_side_doubles_width() {
        let (recorder, sink) = memory_recorder();
        recorder.start(spec(8, 4, true), true).unwrap();

        let processed = Frame::from_raw(4, 4, 3, vec![10; 48]).unwrap();
        let original = Frame::from_raw(4, 4, 3, vec![200; 48]).unwrap();
        assert_eq!(recorder.write(&processed, Some(&original)).unwrap(), Some(1));

        let written = sink.frames();
        assert_eq!(written[0].width, 8);
        assert_eq!(written[0].pixel(0, 0), &[10, 10, 10]);
        assert_eq!(written[0].pixel(4, 0), &[200, 200, 200]);
        assert_eq!(recorder.stop(), Some(1));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn frames_follow_sink_channels() {
        let (recorder, sink) = memory_recorder();
        recorder.start(spec(4, 4, false), false).unwrap();
        recorder.write(&Frame::new(4, 4, 3), None).unwrap();
        assert_eq!(sink.frames()[0].channels, 1);
    }

    #[test]
    fn mismatched_frame_is_rejected() {
        let (recorder, _sink) = memory_recorder();
        recorder.start(spec(4, 4, true), false).unwrap();
        assert!(matches!(
            recorder.write(&Frame::new(5, 4, 3), None),
            Err(Error::SinkWrite(_))
        ));
        assert_eq!(recorder.frames_written(), 0);
    }

    #[test]
    fn unknown_codec_is_refused() {
        let recorder = Recorder::image_sequence();
        let mut bad = spec(4, 4, true);
        bad.codec = "XVID".into();
        assert!(matches!(recorder.start(bad, false), Err(Error::UnsupportedCodec(_))));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn image_sequence_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::image_sequence();
        let mut png = spec(6, 4, true);
        png.codec = DEFAULT_CODEC.into();
        png.path = dir.path().join("out");
        recorder.start(png, false).unwrap();

        recorder.write(&Frame::new(6, 4, 3), None).unwrap();
        recorder.write(&Frame::new(6, 4, 3), None).unwrap();
        assert_eq!(recorder.stop(), Some(2));

        let written = std::fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(written, 2);
        let image = image::open(dir.path().join("out/frame_000001.png")).unwrap();
        assert_eq!((image.width(), image.height()), (6, 4));
    }
}
