//! Seekable source over frames held in memory

use super::frame::Frame;
use super::source::{ReadOutcome, Source, SourceProperty};
use crate::error::{Error, Result};

/// A pre-decoded clip. Behaves like a file: finite, seekable, reopenable.
pub struct MemorySource {
    frames: Vec<Frame>,
    fps: f64,
    position: usize,
    opened: bool,
}

impl MemorySource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        Self {
            frames,
            fps,
            position: 0,
            opened: false,
        }
    }

    fn seek(&mut self, index: f64) -> Result<()> {
        if !index.is_finite() || index < 0.0 || index as usize > self.frames.len() {
            return Err(Error::InvalidSeek {
                index: index.max(0.0) as u64,
                total: self.frames.len() as u64,
            });
        }
        self.position = index as usize;
        Ok(())
    }
}

impl Source for MemorySource {
    fn open(&mut self, identifier: &str) -> Result<()> {
        if self.frames.is_empty() {
            return Err(Error::SourceOpen(format!("{identifier}: clip is empty")));
        }
        self.opened = true;
        self.position = 0;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if !self.opened {
            return Err(Error::SourceClosed);
        }
        match self.frames.get(self.position) {
            Some(frame) => {
                let frame = frame.clone().with_sequence(self.position as u64);
                self.position += 1;
                Ok(ReadOutcome::Frame(frame))
            }
            None => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn set_property(&mut self, property: SourceProperty, value: f64) -> Result<()> {
        match property {
            SourceProperty::PosFrames => self.seek(value),
            SourceProperty::PosMsec if self.fps > 0.0 => self.seek((value * self.fps / 1000.0).floor()),
            SourceProperty::Fps if value > 0.0 => {
                self.fps = value;
                Ok(())
            }
            other => Err(Error::UnsupportedProperty(other)),
        }
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        let first = self.frames.first()?;
        match property {
            SourceProperty::FrameWidth => Some(first.width as f64),
            SourceProperty::FrameHeight => Some(first.height as f64),
            SourceProperty::Fps => Some(self.fps),
            SourceProperty::FrameCount => Some(self.frames.len() as f64),
            SourceProperty::PosFrames => Some(self.position as f64),
            SourceProperty::PosMsec if self.fps > 0.0 => Some(self.position as f64 * 1000.0 / self.fps),
            SourceProperty::PosMsec => None,
        }
    }

    fn release(&mut self) {
        self.opened = false;
        self.position = 0;
    }
}
