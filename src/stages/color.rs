//! Color space conversions on 8-bit samples

use crate::capture::frame::Frame;

/// RGB to HSV with hue halved into 0..=180.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;
    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };
    let h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    [
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        v as u8,
    ]
}

/// Inverse of [`rgb_to_hsv`].
pub fn hsv_to_rgb(h: u8, s: u8, v: u8) -> [u8; 3] {
    let v = v as f32;
    if s == 0 {
        let v = v as u8;
        return [v, v, v];
    }
    let s = s as f32 / 255.0;
    let h = (h as f32 * 2.0) % 360.0 / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [r.round() as u8, g.round() as u8, b.round() as u8]
}

fn srgb_to_linear(c: u8) -> f32 {
    let c = c as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (c * 255.0).round().clamp(0.0, 255.0) as u8
}

// D65 reference white
const XN: f32 = 0.950_456;
const ZN: f32 = 1.088_754;
const EPS: f32 = 0.008_856;

fn lab_f(t: f32) -> f32 {
    if t > EPS {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    let cube = t * t * t;
    if cube > EPS {
        cube
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

/// RGB to 8-bit CIE Lab: L scaled to 0..=255, a and b offset by 128.
pub fn rgb_to_lab(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(srgb_to_linear);
    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / XN;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / ZN;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > EPS { 116.0 * fy - 16.0 } else { 903.3 * y };
    let a = 500.0 * (fx - fy) + 128.0;
    let bb = 200.0 * (fy - fz) + 128.0;
    [
        (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8,
        a.round().clamp(0.0, 255.0) as u8,
        bb.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Inverse of [`rgb_to_lab`].
pub fn lab_to_rgb(lab: [u8; 3]) -> [u8; 3] {
    let l = lab[0] as f32 * 100.0 / 255.0;
    let a = lab[1] as f32 - 128.0;
    let b = lab[2] as f32 - 128.0;

    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;
    let x = lab_f_inv(fx) * XN;
    let y = if l > 903.3 * EPS { fy * fy * fy } else { l / 903.3 };
    let z = lab_f_inv(fz) * ZN;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;
    [linear_to_srgb(r), linear_to_srgb(g), linear_to_srgb(bl)]
}

/// Apply `convert` to every pixel of an RGB frame.
pub fn map_pixels(frame: &Frame, convert: impl Fn([u8; 3]) -> [u8; 3]) -> Frame {
    let mut out = frame.clone();
    for px in out.data.chunks_exact_mut(3) {
        let converted = convert([px[0], px[1], px[2]]);
        px.copy_from_slice(&converted);
    }
    out
}

pub fn frame_to_hsv(frame: &Frame) -> Frame {
    map_pixels(frame, |[r, g, b]| rgb_to_hsv(r, g, b))
}

pub fn frame_from_hsv(frame: &Frame) -> Frame {
    map_pixels(frame, |[h, s, v]| hsv_to_rgb(h, s, v))
}

/// Histogram equalization of one interleaved channel.
pub fn equalize_channel(data: &mut [u8], channels: usize, channel: usize) {
    let mut hist = [0usize; 256];
    for px in data.chunks_exact(channels) {
        hist[px[channel] as usize] += 1;
    }
    let total: usize = hist.iter().sum();
    let Some(first) = hist.iter().position(|&n| n > 0) else {
        return;
    };
    if hist[first] == total {
        return;
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0;
    for i in first + 1..256 {
        sum += hist[i];
        lut[i] = (sum as f32 * scale).round().min(255.0) as u8;
    }
    for px in data.chunks_exact_mut(channels) {
        px[channel] = lut[px[channel] as usize];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_hues() {
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(128, 128, 128), [0, 0, 128]);
    }

    #[test]
    fn hsv_round_trip_is_close() {
        for rgb in [[200, 30, 90], [10, 220, 40], [90, 90, 250], [255, 255, 255]] {
            let [h, s, v] = rgb_to_hsv(rgb[0], rgb[1], rgb[2]);
            let back = hsv_to_rgb(h, s, v);
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 4, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn lab_round_trip_is_close() {
        for rgb in [[0, 0, 0], [255, 255, 255], [180, 40, 60], [20, 140, 200]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                assert!((back[c] as i32 - rgb[c] as i32).abs() <= 3, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn lab_white_and_black() {
        assert_eq!(rgb_to_lab([255, 255, 255]), [255, 128, 128]);
        assert_eq!(rgb_to_lab([0, 0, 0]), [0, 128, 128]);
    }

    #[test]
    fn equalize_spreads_values() {
        let mut data = vec![10, 10, 20, 20, 30, 30];
        equalize_channel(&mut data, 1, 0);
        assert_eq!(data, vec![0, 0, 128, 128, 255, 255]);
    }

    #[test]
    fn equalize_flat_channel_is_untouched() {
        let mut data = vec![5, 1, 5, 2];
        equalize_channel(&mut data, 2, 0);
        assert_eq!(data, vec![5, 1, 5, 2]);
    }
}
