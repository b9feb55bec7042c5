//! Joint spatial/color mean-shift smoothing

use super::color::{lab_to_rgb, map_pixels, rgb_to_lab};
use super::geometry::{half, resize};
use crate::capture::frame::Frame;

pub const SPATIAL_RADIUS: i32 = 10;
pub const COLOR_RADIUS: f32 = 16.0;
const MAX_ITERATIONS: usize = 5;
const MIN_SHIFT_SQ: f32 = 0.01;

/// Smooth a color frame: work at half size in Lab, then restore the
/// original size.
pub fn mean_shift(src: &Frame) -> Frame {
    let lab = map_pixels(&half(src), rgb_to_lab);
    let filtered = filter(&lab, SPATIAL_RADIUS, COLOR_RADIUS);
    resize(&map_pixels(&filtered, lab_to_rgb), src.width, src.height)
}

/// Move every pixel to the mode of its joint neighborhood and take the
/// mode's color.
pub fn filter(lab: &Frame, spatial_radius: i32, color_radius: f32) -> Frame {
    let (w, h) = (lab.width as i32, lab.height as i32);
    let color_radius_sq = color_radius * color_radius;
    let sample = |x: i32, y: i32| {
        let at = (y * w + x) as usize * 3;
        [
            lab.data[at] as f32,
            lab.data[at + 1] as f32,
            lab.data[at + 2] as f32,
        ]
    };

    let mut out = lab.clone();
    for y in 0..h {
        for x in 0..w {
            let (mut px, mut py) = (x as f32, y as f32);
            let mut color = sample(x, y);

            for _ in 0..MAX_ITERATIONS {
                let (cx, cy) = (px.round() as i32, py.round() as i32);
                let (x0, x1) = ((cx - spatial_radius).max(0), (cx + spatial_radius).min(w - 1));
                let (y0, y1) = ((cy - spatial_radius).max(0), (cy + spatial_radius).min(h - 1));

                let mut count = 0.0f32;
                let (mut sx, mut sy) = (0.0f32, 0.0f32);
                let mut sc = [0.0f32; 3];
                for ny in y0..=y1 {
                    for nx in x0..=x1 {
                        let c = sample(nx, ny);
                        let d2: f32 = (0..3).map(|k| (c[k] - color[k]).powi(2)).sum();
                        if d2 > color_radius_sq {
                            continue;
                        }
                        count += 1.0;
                        sx += nx as f32;
                        sy += ny as f32;
                        for k in 0..3 {
                            sc[k] += c[k];
                        }
                    }
                }
                if count == 0.0 {
                    break;
                }

                let (nx, ny) = (sx / count, sy / count);
                let next = sc.map(|s| s / count);
                let shift = (nx - px).powi(2)
                    + (ny - py).powi(2)
                    + (0..3).map(|k| (next[k] - color[k]).powi(2)).sum::<f32>();
                px = nx;
                py = ny;
                color = next;
                if shift < MIN_SHIFT_SQ {
                    break;
                }
            }

            let at = (y * w + x) as usize * 3;
            for k in 0..3 {
                out.data[at + k] = color[k].round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
