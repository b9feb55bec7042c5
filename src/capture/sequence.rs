//! File source over a directory of stills (or a single still)

use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage};
use tracing::{debug, info, instrument};

use super::frame::Frame;
use super::source::{ReadOutcome, Source, SourceProperty};
use crate::error::{Error, Result};

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays numbered stills like a video file. Files are ordered by name.
pub struct ImageSequenceSource {
    fps: f64,
    files: Vec<PathBuf>,
    width: u32,
    height: u32,
    position: usize,
    opened: bool,
}

impl ImageSequenceSource {
    pub fn new(fps: f64) -> Self {
        Self {
            fps,
            files: Vec::new(),
            width: 0,
            height: 0,
            position: 0,
            opened: false,
        }
    }

    fn list(path: &Path) -> Result<Vec<PathBuf>> {
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let path = entry?.path();
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if known && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn decode(&self, path: &Path) -> Result<Frame> {
        let image = image::open(path)
            .map_err(|e| Error::SourceRead(format!("{}: {e}", path.display())))?;
        let frame = to_frame(image)?;
        if frame.width != self.width || frame.height != self.height {
            return Err(Error::SourceRead(format!(
                "{} is {}x{}, sequence is {}x{}",
                path.display(),
                frame.width,
                frame.height,
                self.width,
                self.height
            )));
        }
        Ok(frame)
    }

    fn seek(&mut self, index: f64) -> Result<()> {
        if !index.is_finite() || index < 0.0 || index as usize > self.files.len() {
            return Err(Error::InvalidSeek {
                index: index.max(0.0) as u64,
                total: self.files.len() as u64,
            });
        }
        self.position = index as usize;
        Ok(())
    }
}

/// Gray stills stay single-channel, everything else becomes RGB.
pub fn to_frame(image: DynamicImage) -> Result<Frame> {
    let (width, height) = (image.width(), image.height());
    match image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::L16 | ColorType::La16 => {
            Frame::from_raw(width, height, 1, image.into_luma8().into_raw())
        }
        _ => Frame::from_raw(width, height, 3, image.into_rgb8().into_raw()),
    }
}

impl Source for ImageSequenceSource {
    #[instrument(skip(self))]
    fn open(&mut self, identifier: &str) -> Result<()> {
        let files = Self::list(Path::new(identifier))
            .map_err(|e| Error::SourceOpen(format!("{identifier}: {e}")))?;
        let first = files
            .first()
            .ok_or_else(|| Error::SourceOpen(format!("{identifier}: no image files")))?;
        let (width, height) = image::image_dimensions(first)
            .map_err(|e| Error::SourceOpen(format!("{}: {e}", first.display())))?;

        info!(
            "Opened sequence {identifier}: {} frames of {width}x{height}",
            files.len()
        );
        self.files = files;
        self.width = width;
        self.height = height;
        self.position = 0;
        self.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if !self.opened {
            return Err(Error::SourceClosed);
        }
        let Some(path) = self.files.get(self.position) else {
            return Ok(ReadOutcome::EndOfStream);
        };
        debug!("Reading {}", path.display());
        let frame = self.decode(path)?.with_sequence(self.position as u64);
        self.position += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn set_property(&mut self, property: SourceProperty, value: f64) -> Result<()> {
        match property {
            SourceProperty::PosFrames => self.seek(value),
            SourceProperty::PosMsec if self.fps > 0.0 => {
                self.seek((value * self.fps / 1000.0).floor())
            }
            SourceProperty::Fps if value > 0.0 => {
                self.fps = value;
                Ok(())
            }
            other => Err(Error::UnsupportedProperty(other)),
        }
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        if !self.opened {
            return match property {
                SourceProperty::Fps => Some(self.fps),
                _ => None,
            };
        }
        match property {
            SourceProperty::FrameWidth => Some(self.width as f64),
            SourceProperty::FrameHeight => Some(self.height as f64),
            SourceProperty::Fps => Some(self.fps),
            SourceProperty::FrameCount => Some(self.files.len() as f64),
            SourceProperty::PosFrames => Some(self.position as f64),
            SourceProperty::PosMsec if self.fps > 0.0 => {
                Some(self.position as f64 * 1000.0 / self.fps)
            }
            SourceProperty::PosMsec => None,
        }
    }

    fn release(&mut self) {
        self.opened = false;
        self.files.clear();
        self.position = 0;
    }
}
