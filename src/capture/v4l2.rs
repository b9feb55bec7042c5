//! V4L2 live capture with memory-mapped buffers

use std::path::Path;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::PixelFormat;
use super::source::{ReadOutcome, Source, SourceProperty};
use crate::error::{Error, Result};
use crate::CaptureConfig;

/// Live V4L2 device
pub struct V4l2Source {
    device: Option<Box<Device>>,
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
    fps: u32,
    format: PixelFormat,
    buffer_count: u32,
    sequence: u64,
}

impl V4l2Source {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            device: None,
            stream: None,
            width: config.width,
            height: config.height,
            fps: config.fps,
            format: config.format,
            buffer_count: config.buffer_count,
            sequence: 0,
        }
    }

    fn fourcc(format: PixelFormat) -> Result<FourCC> {
        match format {
            PixelFormat::Mjpeg => Ok(FourCC::new(b"MJPG")),
            PixelFormat::Yuyv4 => Ok(FourCC::new(b"YUYV")),
            PixelFormat::Rgb24 => Ok(FourCC::new(b"RGB3")),
            PixelFormat::Bgr24 => Ok(FourCC::new(b"BGR3")),
            PixelFormat::Nv12 => Ok(FourCC::new(b"NV12")),
            PixelFormat::Gray8 => Ok(FourCC::new(b"GREY")),
        }
    }
}

impl Source for V4l2Source {
    #[instrument(skip(self))]
    fn open(&mut self, identifier: &str) -> Result<()> {
        let open_err = |e: std::io::Error| Error::SourceOpen(format!("{identifier}: {e}"));

        let device = Device::with_path(identifier).map_err(open_err)?;
        let caps = device.query_caps().map_err(open_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(Error::SourceOpen(format!(
                "{identifier} doesn't support video capture"
            )));
        }

        let mut fmt = device.format().map_err(open_err)?;
        fmt.width = self.width;
        fmt.height = self.height;
        fmt.fourcc = Self::fourcc(self.format)?;
        let fmt = device.set_format(&fmt).map_err(open_err)?;
        // The driver may pick the closest supported size
        self.width = fmt.width;
        self.height = fmt.height;

        if let Err(e) = device.set_params(&Parameters::with_fps(self.fps)) {
            warn!("Could not set {} fps on {identifier}: {e}", self.fps);
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, self.buffer_count)
            .map_err(open_err)?;
        info!(
            "Capture stream started with {} buffers ({}x{} {:?})",
            self.buffer_count, self.width, self.height, self.format
        );

        self.device = Some(Box::new(device));
        self.stream = Some(stream);
        self.sequence = 0;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.stream.is_some()
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        let stream = self.stream.as_mut().ok_or(Error::SourceClosed)?;
        let (buf, _meta) = stream
            .next()
            .map_err(|e| Error::SourceRead(format!("dequeue failed: {e}")))?;
        let frame = decoder::decode_frame(buf, self.width, self.height, self.format)?
            .with_sequence(self.sequence);
        self.sequence += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn set_property(&mut self, property: SourceProperty, value: f64) -> Result<()> {
        // Geometry is negotiated on open
        if self.is_opened() {
            return Err(Error::UnsupportedProperty(property));
        }
        match property {
            SourceProperty::FrameWidth if value >= 1.0 => self.width = value as u32,
            SourceProperty::FrameHeight if value >= 1.0 => self.height = value as u32,
            SourceProperty::Fps if value >= 1.0 => self.fps = value as u32,
            other => return Err(Error::UnsupportedProperty(other)),
        }
        Ok(())
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::FrameWidth => Some(self.width as f64),
            SourceProperty::FrameHeight => Some(self.height as f64),
            SourceProperty::Fps => Some(self.fps as f64),
            _ => None,
        }
    }

    fn release(&mut self) {
        self.stream = None;
        self.device = None;
    }
}

/// Detected capture device info
#[derive(Debug, Clone)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

/// Auto-detect best capture device, preferring MJPEG over YUYV.
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            for fmt in formats {
                if fmt.fourcc == FourCC::new(b"MJPG") {
                    info!("Found MJPEG device: {} - {}", path, caps.card);
                    return Ok(FoundDevice {
                        path,
                        format: PixelFormat::Mjpeg,
                    });
                } else if fmt.fourcc == FourCC::new(b"YUYV") {
                    info!("Found YUYV device: {} - {}", path, caps.card);
                    return Ok(FoundDevice {
                        path,
                        format: PixelFormat::Yuyv4,
                    });
                }
            }
        }
    }

    Err(Error::SourceOpen("no suitable capture device found".into()))
}
