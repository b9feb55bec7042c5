//! Synthetic live device producing moving color bars at a fixed rate

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::frame::Frame;
use super::source::{ReadOutcome, Source, SourceProperty};
use crate::error::{Error, Result};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Camera stand-in. Reads block until the next frame is due, the way a real
/// device delivers at its native rate.
pub struct PatternSource {
    width: u32,
    height: u32,
    fps: f64,
    /// Simulate a disconnect after this many frames
    fail_after: Option<u64>,
    opened: bool,
    sequence: u64,
    next_due: Option<Instant>,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            fail_after: None,
            opened: false,
            sequence: 0,
            next_due: None,
        }
    }

    /// Make the device "disappear" after `frames` successful reads.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    fn render(&self) -> Frame {
        let mut frame = Frame::new(self.width, self.height, 3);
        let bar_width = (self.width / BARS.len() as u32).max(1);
        let shift = self.sequence as u32;
        for y in 0..self.height {
            for x in 0..self.width {
                let bar = ((x + shift) / bar_width) as usize % BARS.len();
                frame.pixel_mut(x, y).copy_from_slice(&BARS[bar]);
            }
        }
        frame.with_sequence(self.sequence)
    }

    fn pace(&mut self) {
        if self.fps <= 0.0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / self.fps);
        let now = Instant::now();
        match self.next_due {
            Some(due) if due > now => {
                std::thread::sleep(due - now);
                self.next_due = Some(due + interval);
            }
            _ => self.next_due = Some(now + interval),
        }
    }
}

impl Source for PatternSource {
    fn open(&mut self, identifier: &str) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::SourceOpen(format!(
                "{identifier}: invalid size {}x{}",
                self.width, self.height
            )));
        }
        info!(
            "Pattern device {identifier} open: {}x{} @ {} fps",
            self.width, self.height, self.fps
        );
        self.opened = true;
        self.sequence = 0;
        self.next_due = None;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if !self.opened {
            return Err(Error::SourceClosed);
        }
        if self.fail_after.is_some_and(|limit| self.sequence >= limit) {
            debug!("Pattern device lost after {} frames", self.sequence);
            return Err(Error::SourceRead("device disconnected".into()));
        }
        self.pace();
        let frame = self.render();
        self.sequence += 1;
        Ok(ReadOutcome::Frame(frame))
    }

    fn set_property(&mut self, property: SourceProperty, value: f64) -> Result<()> {
        match property {
            SourceProperty::FrameWidth if value >= 1.0 => self.width = value as u32,
            SourceProperty::FrameHeight if value >= 1.0 => self.height = value as u32,
            SourceProperty::Fps if value >= 0.0 => self.fps = value,
            other => return Err(Error::UnsupportedProperty(other)),
        }
        Ok(())
    }

    fn property(&self, property: SourceProperty) -> Option<f64> {
        match property {
            SourceProperty::FrameWidth => Some(self.width as f64),
            SourceProperty::FrameHeight => Some(self.height as f64),
            SourceProperty::Fps => Some(self.fps),
            _ => None,
        }
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sequenced_frames() {
        let mut source = PatternSource::new(16, 4, 0.0);
        source.open("pattern").unwrap();
        for expected in 0..3 {
            match source.read_frame().unwrap() {
                ReadOutcome::Frame(frame) => {
                    assert_eq!(frame.sequence, expected);
                    assert_eq!((frame.width, frame.height, frame.channels), (16, 4, 3));
                }
                ReadOutcome::EndOfStream => panic!("live source never ends"),
            }
        }
    }

    #[test]
    fn read_before_open_fails() {
        let mut source = PatternSource::new(8, 8, 0.0);
        assert!(matches!(source.read_frame(), Err(Error::SourceClosed)));
    }

    #[test]
    fn simulated_disconnect() {
        let mut source = PatternSource::new(8, 8, 0.0).failing_after(1);
        source.open("pattern").unwrap();
        assert!(source.read_frame().is_ok());
        assert!(matches!(source.read_frame(), Err(Error::SourceRead(_))));
    }

    #[test]
    fn seeking_is_unsupported() {
        let mut source = PatternSource::new(8, 8, 0.0);
        assert!(source.set_property(SourceProperty::PosFrames, 3.0).is_err());
    }
}
