//! HSV range segmentation and hue histogram overlay

use super::color::{equalize_channel, frame_from_hsv, frame_to_hsv, hsv_to_rgb};
use super::contours::Point;
use super::draw::fill_rect;
use super::filter::gaussian_blur;
use crate::capture::frame::Frame;
use crate::pipeline::control::Hsv;

pub const HUE_BINS: usize = 32;

/// Keep pixels whose HSV lies inside `low..=high`. The binary mask is
/// softened by a 5x5 Gaussian and ANDed bytewise with the image.
/// With `equalize`, the value channel is equalized before masking.
pub fn segment(frame: &Frame, low: Hsv, high: Hsv, equalize: bool) -> Frame {
    let mut hsv = frame_to_hsv(frame);

    let mut mask = Frame::new(frame.width, frame.height, 1);
    for (m, px) in mask.data.iter_mut().zip(hsv.data.chunks_exact(3)) {
        let inside = (low.h..=high.h).contains(&px[0])
            && (low.s..=high.s).contains(&px[1])
            && (low.v..=high.v).contains(&px[2]);
        *m = if inside { 255 } else { 0 };
    }
    let mask = gaussian_blur(&mask, 5, 2.0);

    if equalize {
        equalize_channel(&mut hsv.data, 3, 2);
    }
    let mut out = frame_from_hsv(&hsv);
    for (px, &m) in out.data.chunks_exact_mut(3).zip(&mask.data) {
        for v in px {
            *v &= m;
        }
    }
    out
}

/// Min-max normalized 32-bin hue histogram, values in 0..=255.
pub fn hue_histogram(frame: &Frame) -> [f32; HUE_BINS] {
    let mut bins = [0f32; HUE_BINS];
    for px in frame.data.chunks_exact(3) {
        let [h, _, _] = super::color::rgb_to_hsv(px[0], px[1], px[2]);
        let bin = (h as usize * HUE_BINS / 180).min(HUE_BINS - 1);
        bins[bin] += 1.0;
    }
    let min = bins.iter().copied().fold(f32::INFINITY, f32::min);
    let max = bins.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    for b in &mut bins {
        *b = if range > 0.0 { (*b - min) * 255.0 / range } else { 0.0 };
    }
    bins
}

/// Draw the histogram as hue-colored bars along the bottom edge. The bar
/// area is `width / 16` tall.
pub fn draw_hue_histogram(frame: &mut Frame) {
    let bins = hue_histogram(frame);
    let area = (frame.width / 16) as f32;
    let bin_width = (frame.width as usize / HUE_BINS) as i32;
    let bottom = frame.height as i32;

    for (i, value) in bins.iter().enumerate() {
        let hue = (i * 180 / HUE_BINS) as u8;
        let color = hsv_to_rgb(hue, 255, 255);
        let bar = (value * area / 255.0).round() as i32;
        let left = i as i32 * bin_width;
        fill_rect(
            frame,
            Point::new(left, bottom),
            Point::new(left + bin_width, bottom - bar - 3),
            color,
        );
    }
}
