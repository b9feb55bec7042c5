//! Flags, settings and ROI shared between a caller and a worker loop

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::frame::Roi;
use crate::capture::source::SourceGeometry;
use crate::error::{Error, Result};

/// One switch per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingFlags {
    pub grayscale: bool,
    pub flip: bool,
    pub blur: bool,
    pub dilate: bool,
    pub erode: bool,
    /// HSV range segmentation with hue histogram overlay
    pub hsv_histogram: bool,
    /// Value-channel equalization inside the HSV stage
    pub hsv_equalize: bool,
    pub canny: bool,
    pub cartoon: bool,
    pub mean_shift: bool,
    pub foreground: bool,
    pub orientation: bool,
    pub chart: bool,
}

impl ProcessingFlags {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipAxis {
    /// Around the x axis (code 0)
    Vertical,
    /// Around the y axis (code 1)
    #[default]
    Horizontal,
    /// Both axes (code -1)
    Both,
}

impl FlipAxis {
    pub fn code(self) -> i32 {
        match self {
            FlipAxis::Vertical => 0,
            FlipAxis::Horizontal => 1,
            FlipAxis::Both => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FlipAxis::Vertical),
            1 => Some(FlipAxis::Horizontal),
            -1 => Some(FlipAxis::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurMode {
    #[default]
    Median,
    Gaussian,
    Morphology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphOp {
    #[default]
    Open,
    Close,
    Gradient,
}

/// Hue (0..=180), saturation and value (0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    pub const HUE_MAX: u8 = 180;

    pub fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

/// Numeric parameters of the stages. Independent of which stages are on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub flip_axis: FlipAxis,
    pub blur_mode: BlurMode,
    pub morph_op: MorphOp,
    pub dilate_iterations: u32,
    pub erode_iterations: u32,
    pub hsv_low: Hsv,
    pub hsv_high: Hsv,
    pub canny_low: f64,
    pub canny_high: f64,
    /// Sobel aperture: 3, 5 or 7
    pub canny_aperture: u8,
    pub canny_l2_gradient: bool,
    /// Target frame rate, 0 means "use the measured rate"
    pub framerate: f64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            flip_axis: FlipAxis::Horizontal,
            blur_mode: BlurMode::Median,
            morph_op: MorphOp::Open,
            dilate_iterations: 1,
            erode_iterations: 1,
            hsv_low: Hsv::new(0, 0, 0),
            hsv_high: Hsv::new(Hsv::HUE_MAX, 255, 255),
            canny_low: 50.0,
            canny_high: 150.0,
            canny_aperture: 3,
            canny_l2_gradient: false,
            framerate: 0.0,
        }
    }
}

impl ProcessingSettings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidSettings(msg));

        if !matches!(self.canny_aperture, 3 | 5 | 7) {
            return invalid(format!(
                "canny aperture must be 3, 5 or 7, got {}",
                self.canny_aperture
            ));
        }
        for (name, value) in [("low", self.canny_low), ("high", self.canny_high)] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("canny {name} threshold {value} is not a valid threshold"));
            }
        }
        if self.hsv_low.h > Hsv::HUE_MAX || self.hsv_high.h > Hsv::HUE_MAX {
            return invalid(format!(
                "hue bounds must lie in 0..={}, got {}..={}",
                Hsv::HUE_MAX,
                self.hsv_low.h,
                self.hsv_high.h
            ));
        }
        let (lo, hi) = (self.hsv_low, self.hsv_high);
        if lo.h > hi.h || lo.s > hi.s || lo.v > hi.v {
            return invalid(format!("hsv bounds are inverted: {lo:?} > {hi:?}"));
        }
        if !self.framerate.is_finite() || self.framerate < 0.0 {
            return invalid(format!("framerate {} is not valid", self.framerate));
        }
        Ok(())
    }
}

/// Everything a loop reads once per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSnapshot {
    pub flags: ProcessingFlags,
    pub settings: ProcessingSettings,
    /// `None` until a source geometry is known; then always inside it
    pub roi: Option<Roi>,
}

/// Latest-value cell. Readers load a whole snapshot without locking; writers
/// are serialized and validate before publishing, so a rejected update leaves
/// the previous values in effect.
pub struct ControlCell {
    current: ArcSwap<ControlSnapshot>,
    geometry: Mutex<Option<SourceGeometry>>,
}

impl ControlCell {
    pub fn new(flags: ProcessingFlags, settings: ProcessingSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            current: ArcSwap::from_pointee(ControlSnapshot {
                flags,
                settings,
                roi: None,
            }),
            geometry: Mutex::new(None),
        })
    }

    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.current.load_full()
    }

    pub fn flags(&self) -> ProcessingFlags {
        self.current.load().flags
    }

    pub fn settings(&self) -> ProcessingSettings {
        self.current.load().settings
    }

    pub fn roi(&self) -> Option<Roi> {
        self.current.load().roi
    }

    pub fn geometry(&self) -> Option<SourceGeometry> {
        *self.geometry.lock()
    }

    pub fn set_flags(&self, flags: ProcessingFlags) {
        let _writer = self.geometry.lock();
        self.publish(|snap| snap.flags = flags);
    }

    pub fn set_settings(&self, settings: ProcessingSettings) -> Result<()> {
        settings.validate()?;
        let _writer = self.geometry.lock();
        self.publish(|snap| snap.settings = settings);
        Ok(())
    }

    /// Replace the ROI. Must fit the current source geometry.
    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        let geometry = self.geometry.lock();
        let Some(geo) = *geometry else {
            return Err(Error::InvalidRoi {
                roi,
                width: 0,
                height: 0,
            });
        };
        if !roi.fits_within(geo.width, geo.height) {
            return Err(Error::InvalidRoi {
                roi,
                width: geo.width,
                height: geo.height,
            });
        }
        debug!("ROI set to {roi:?}");
        self.publish(|snap| snap.roi = Some(roi));
        Ok(())
    }

    /// Record a newly connected source. The ROI resets to the full frame.
    pub fn set_geometry(&self, geo: SourceGeometry) {
        let mut geometry = self.geometry.lock();
        *geometry = Some(geo);
        self.publish(|snap| snap.roi = Some(Roi::full(geo.width, geo.height)));
    }

    /// Forget the source; ROI updates are rejected until the next connect.
    pub fn clear_geometry(&self) {
        let mut geometry = self.geometry.lock();
        *geometry = None;
        self.publish(|snap| snap.roi = None);
    }

    // Callers hold the geometry lock, which doubles as the writer lock
    fn publish(&self, update: impl FnOnce(&mut ControlSnapshot)) {
        let mut next = **self.current.load();
        update(&mut next);
        self.current.store(Arc::new(next));
    }
}

impl Default for ControlCell {
    fn default() -> Self {
        Self {
            current: ArcSwap::from_pointee(ControlSnapshot {
                flags: ProcessingFlags::default(),
                settings: ProcessingSettings::default(),
                roi: None,
            }),
            geometry: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(width: u32, height: u32) -> SourceGeometry {
        SourceGeometry {
            width,
            height,
            channels: 3,
        }
    }

    #[test]
    fn flip_codes_round_trip() {
        for axis in [FlipAxis::Vertical, FlipAxis::Horizontal, FlipAxis::Both] {
            assert_eq!(FlipAxis::from_code(axis.code()), Some(axis));
        }
        assert_eq!(FlipAxis::from_code(2), None);
    }

    #[test]
    fn default_settings_are_valid() {
        ProcessingSettings::default().validate().unwrap();
    }

    #[test]
    fn even_aperture_is_rejected() {
        let settings = ProcessingSettings {
            canny_aperture: 4,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn inverted_hsv_bounds_are_rejected() {
        let settings = ProcessingSettings {
            hsv_low: Hsv::new(100, 0, 0),
            hsv_high: Hsv::new(50, 255, 255),
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let hue_too_high = ProcessingSettings {
            hsv_high: Hsv::new(200, 255, 255),
            ..Default::default()
        };
        assert!(hue_too_high.validate().is_err());
    }

    #[test]
    fn rejected_update_keeps_previous_settings() {
        let cell = ControlCell::default();
        let good = ProcessingSettings {
            canny_low: 10.0,
            ..Default::default()
        };
        cell.set_settings(good).unwrap();

        let bad = ProcessingSettings {
            canny_low: -1.0,
            ..Default::default()
        };
        assert!(cell.set_settings(bad).is_err());
        assert_eq!(cell.settings(), good);
    }

    #[test]
    fn roi_must_fit_geometry() {
        let cell = ControlCell::default();
        assert!(cell.set_roi(Roi::new(0, 0, 10, 10)).is_err());

        cell.set_geometry(geometry(640, 480));
        assert_eq!(cell.roi(), Some(Roi::full(640, 480)));

        cell.set_roi(Roi::new(10, 10, 100, 100)).unwrap();
        assert!(cell.set_roi(Roi::new(600, 0, 100, 100)).is_err());
        assert_eq!(cell.roi(), Some(Roi::new(10, 10, 100, 100)));

        cell.clear_geometry();
        assert_eq!(cell.roi(), None);
    }

    #[test]
    fn snapshot_is_whole() {
        let cell = ControlCell::default();
        let flags = ProcessingFlags {
            canny: true,
            flip: true,
            ..Default::default()
        };
        cell.set_flags(flags);
        let snap = cell.snapshot();
        assert_eq!(snap.flags, flags);
        assert_eq!(snap.settings, ProcessingSettings::default());
    }
}
