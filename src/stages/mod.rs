//! Image-processing stages and the fixed-order executor that runs them
//!
//! Stages run in this order, each seeing the previous stage's output:
//! grayscale, flip, blur, dilate, erode, HSV segmentation with histogram,
//! Canny, cartoon, mean shift, foreground, orientation, chart.

pub mod background;
pub mod cartoon;
pub mod chart;
pub mod color;
pub mod complex;
pub mod contours;
pub mod draw;
pub mod edges;
pub mod filter;
pub mod geometry;
pub mod histogram;
pub mod meanshift;
pub mod morphology;
pub mod orientation;

use tracing::trace;

use crate::capture::frame::Frame;
use crate::pipeline::control::{BlurMode, ProcessingFlags, ProcessingSettings};
use background::BackgroundModel;
use morphology::StructuringElement;

/// Runs the enabled stages over a frame. Owns the only state that lives
/// across frames: the foreground stage's background model.
#[derive(Debug, Default)]
pub struct Pipeline {
    background: BackgroundModel,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the background model over with the next frame.
    pub fn reset_background(&mut self) {
        self.background.reset();
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    /// Process `frame` in place. Sequence number and timestamp are kept.
    pub fn run(&mut self, frame: &mut Frame, flags: &ProcessingFlags, settings: &ProcessingSettings) {
        if !flags.any() {
            return;
        }
        let (sequence, timestamp) = (frame.sequence, frame.timestamp);

        if flags.grayscale && frame.is_color() {
            *frame = frame.to_gray();
        }

        if flags.flip {
            geometry::flip(frame, settings.flip_axis);
        }

        if flags.blur {
            *frame = match settings.blur_mode {
                BlurMode::Median => filter::median_blur(frame, 3),
                BlurMode::Gaussian => filter::gaussian_blur(frame, 5, 2.0),
                BlurMode::Morphology => morphology::morphology(
                    frame,
                    settings.morph_op,
                    &StructuringElement::ellipse(5, 5),
                ),
            };
        }

        if flags.dilate {
            let element = StructuringElement::rect(3, 3);
            *frame = morphology::dilate(frame, &element, settings.dilate_iterations);
        }

        if flags.erode {
            let element = StructuringElement::rect(3, 3);
            *frame = morphology::erode(frame, &element, settings.erode_iterations);
        }

        if flags.hsv_histogram && frame.is_color() {
            *frame = histogram::segment(
                frame,
                settings.hsv_low,
                settings.hsv_high,
                flags.hsv_equalize,
            );
            histogram::draw_hue_histogram(frame);
        }

        if flags.canny {
            let gray = filter::gaussian_blur(&frame.to_gray(), 3, 0.0);
            let edges = edges::canny(
                &gray,
                settings.canny_low,
                settings.canny_high,
                settings.canny_aperture,
                settings.canny_l2_gradient,
            );
            if frame.is_color() {
                for (px, &e) in frame.data.chunks_exact_mut(3).zip(&edges.data) {
                    px[0] = e;
                    px[2] = e;
                }
            } else {
                frame.data = edges.data;
            }
        }

        if flags.cartoon {
            *frame = cartoon::cartoonify(frame);
        }

        if flags.mean_shift && frame.is_color() {
            *frame = meanshift::mean_shift(frame);
        }

        if flags.foreground {
            background::extract_foreground(frame, &mut self.background);
        }

        if flags.orientation {
            let found = orientation::annotate(frame);
            trace!("orientation: {} blobs", found.len());
        }

        if flags.chart && frame.is_color() {
            if let Some(chart) = chart::annotate(frame) {
                trace!("chart: {} patches", chart.patches.len());
            }
        }

        frame.sequence = sequence;
        frame.timestamp = timestamp;
    }
}
