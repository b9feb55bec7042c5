//! Adaptive per-pixel Gaussian background model and foreground cut-out

use tracing::debug;

use super::filter::median_blur;
use crate::capture::frame::Frame;

const HISTORY: u32 = 500;
/// Squared Mahalanobis distance under which a pixel matches the model
const VAR_THRESHOLD: f32 = 16.0;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 75.0;
const MASK_THRESHOLD: u8 = 20;

/// Running mean and isotropic variance per pixel. Learns with rate
/// `1 / min(frames, HISTORY)`, so it adapts fast at first and then settles.
#[derive(Debug, Default)]
pub struct BackgroundModel {
    mean: Vec<f32>,
    variance: Vec<f32>,
    width: u32,
    height: u32,
    channels: u8,
    frames: u32,
}

impl BackgroundModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.frames > 0
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Forget everything; the next frame becomes the background.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn init(&mut self, frame: &Frame) {
        debug!(
            "Background model initialised at {}x{}x{}",
            frame.width, frame.height, frame.channels
        );
        self.mean = frame.data.iter().map(|&v| v as f32).collect();
        self.variance = vec![VAR_INIT; frame.len_pixels()];
        self.width = frame.width;
        self.height = frame.height;
        self.channels = frame.channels;
        self.frames = 1;
    }

    /// Update with `frame` and return its foreground mask (255 = foreground).
    pub fn apply(&mut self, frame: &Frame) -> Frame {
        let mut mask = Frame {
            data: vec![0; frame.len_pixels()],
            channels: 1,
            ..frame.clone()
        };
        let same_shape = self.width == frame.width
            && self.height == frame.height
            && self.channels == frame.channels;
        // A new geometry cannot reuse the old statistics
        if !self.is_initialized() || !same_shape {
            self.init(frame);
            return mask;
        }

        self.frames = self.frames.saturating_add(1);
        let alpha = 1.0 / self.frames.min(HISTORY) as f32;
        let c = frame.channels as usize;

        for (i, px) in frame.data.chunks_exact(c).enumerate() {
            let mean = &mut self.mean[i * c..(i + 1) * c];
            let var = &mut self.variance[i];

            let dist_sq: f32 = px
                .iter()
                .zip(mean.iter())
                .map(|(&v, &m)| (v as f32 - m).powi(2))
                .sum();
            if dist_sq > VAR_THRESHOLD * *var {
                mask.data[i] = 255;
            }

            for (m, &v) in mean.iter_mut().zip(px) {
                *m += alpha * (v as f32 - *m);
            }
            *var = (*var + alpha * (dist_sq / c as f32 - *var)).clamp(VAR_MIN, VAR_MAX);
        }
        mask
    }
}

/// Update the model and paint background pixels white.
pub fn extract_foreground(frame: &mut Frame, model: &mut BackgroundModel) {
    let mask = median_blur(&model.apply(frame), 5);
    let c = frame.channels as usize;
    for (px, &m) in frame.data.chunks_exact_mut(c).zip(&mask.data) {
        if m <= MASK_THRESHOLD {
            px.fill(255);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(block: Option<[u8; 3]>) -> Frame {
        let mut frame = Frame::from_raw(24, 24, 3, vec![60; 24 * 24 * 3]).unwrap();
        if let Some(color) = block {
            for y in 8..16 {
                for x in 8..16 {
                    frame.pixel_mut(x, y).copy_from_slice(&color);
                }
            }
        }
        frame
    }

    #[test]
    fn first_frame_is_all_background() {
        let mut model = BackgroundModel::new();
        let mut frame = scene(None);
        extract_foreground(&mut frame, &mut model);
        assert!(frame.data.iter().all(|&v| v == 255));
        assert!(model.is_initialized());
    }

    #[test]
    fn new_object_is_kept() {
        let mut model = BackgroundModel::new();
        for _ in 0..3 {
            extract_foreground(&mut scene(None), &mut model);
        }
        let mut frame = scene(Some([220, 30, 30]));
        extract_foreground(&mut frame, &mut model);
        assert_eq!(frame.pixel(12, 12), &[220, 30, 30]);
        assert_eq!(frame.pixel(2, 2), &[255, 255, 255]);
    }

    #[test]
    fn model_persists_until_reset() {
        let mut model = BackgroundModel::new();
        extract_foreground(&mut scene(None), &mut model);
        extract_foreground(&mut scene(None), &mut model);
        assert_eq!(model.frames(), 2);

        model.reset();
        assert!(!model.is_initialized());
        // After a reset the object is part of the new background
        let mut frame = scene(Some([220, 30, 30]));
        extract_foreground(&mut frame, &mut model);
        assert_eq!(frame.pixel(12, 12), &[255, 255, 255]);
    }

    #[test]
    fn geometry_change_reinitialises() {
        let mut model = BackgroundModel::new();
        model.apply(&scene(None));
        let small = Frame::new(4, 4, 1);
        let mask = model.apply(&small);
        assert_eq!(mask.data, vec![0; 16]);
        assert_eq!(model.frames(), 1);
    }
}
