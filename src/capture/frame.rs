use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{Error, Result};

/// Decoded 8-bit frame, gray (1 channel) or RGB (3 channels), rows packed.
///
/// Frames are plain values: every thread boundary is crossed by moving or
/// cloning, never by sharing a mutable buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Position in the producing source's stream
    pub sequence: u64,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
    Gray8,
}

/// Rectangle of the source frame the pipeline works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// ROI covering a whole `width`x`height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True when the rectangle is non-empty and lies inside `width`x`height`.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty()
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    pub fn is_full(&self, width: u32, height: u32) -> bool {
        *self == Self::full(width, height)
    }
}

impl Frame {
    /// Zero-filled frame.
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        let len = width as usize * height as usize * channels as usize;
        Self {
            data: vec![0; len],
            width,
            height,
            channels,
            sequence: 0,
            timestamp: Instant::now(),
        }
    }

    /// Wrap an existing pixel buffer, checking its length against the geometry.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        if channels != 1 && channels != 3 {
            return Err(Error::InvalidFrame(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{width}x{height}x{channels} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            sequence: 0,
            timestamp: Instant::now(),
        })
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn is_color(&self) -> bool {
        self.channels >= 3
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    pub fn len_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let at = self.offset(x, y);
        &self.data[at..at + self.channels as usize]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let at = self.offset(x, y);
        let channels = self.channels as usize;
        &mut self.data[at..at + channels]
    }

    /// Copy of the ROI area. Sequence and timestamp carry over.
    pub fn crop(&self, roi: &Roi) -> Result<Frame> {
        if !roi.fits_within(self.width, self.height) {
            return Err(Error::InvalidRoi {
                roi: *roi,
                width: self.width,
                height: self.height,
            });
        }
        if roi.is_full(self.width, self.height) {
            return Ok(self.clone());
        }

        let channels = self.channels as usize;
        let row_len = roi.width as usize * channels;
        let mut data = Vec::with_capacity(row_len * roi.height as usize);
        for y in roi.y..roi.y + roi.height {
            let start = self.offset(roi.x, y);
            data.extend_from_slice(&self.data[start..start + row_len]);
        }

        Ok(Frame {
            data,
            width: roi.width,
            height: roi.height,
            channels: self.channels,
            sequence: self.sequence,
            timestamp: self.timestamp,
        })
    }

    /// Luma-weighted gray copy; gray frames are cloned.
    pub fn to_gray(&self) -> Frame {
        if !self.is_color() {
            return self.clone();
        }
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect();
        Frame {
            data,
            channels: 1,
            ..self.shallow_meta()
        }
    }

    /// RGB copy; gray samples are replicated into all three channels.
    pub fn to_rgb(&self) -> Frame {
        if self.is_color() {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.data.len() * 3);
        for &v in &self.data {
            data.extend_from_slice(&[v, v, v]);
        }
        Frame {
            data,
            channels: 3,
            ..self.shallow_meta()
        }
    }

    /// Copy with the requested channel count (1 or 3).
    pub fn to_channels(&self, channels: u8) -> Frame {
        if channels >= 3 {
            self.to_rgb()
        } else {
            self.to_gray()
        }
    }

    /// Side-by-side composition: `left` then `right`, both brought to
    /// `left`'s channel count. Heights must match.
    pub fn hconcat(left: &Frame, right: &Frame) -> Result<Frame> {
        if left.height != right.height {
            return Err(Error::InvalidFrame(format!(
                "cannot join frames of height {} and {}",
                left.height, right.height
            )));
        }
        let right = right.to_channels(left.channels);
        let width = left.width + right.width;
        let mut data = Vec::with_capacity(left.data.len() + right.data.len());
        for y in 0..left.height as usize {
            data.extend_from_slice(&left.data[y * left.stride()..(y + 1) * left.stride()]);
            data.extend_from_slice(&right.data[y * right.stride()..(y + 1) * right.stride()]);
        }
        Ok(Frame {
            data,
            width,
            height: left.height,
            channels: left.channels,
            sequence: left.sequence,
            timestamp: left.timestamp,
        })
    }

    fn shallow_meta(&self) -> Frame {
        Frame {
            data: Vec::new(),
            width: self.width,
            height: self.height,
            channels: self.channels,
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }
}

/// ITU-R BT.601 luma, rounded.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}
