//! Canny edge detection

use super::filter::sobel;
use crate::capture::frame::Frame;

const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

/// Edge map (0/255) of a gray frame. Thresholds are swapped when given in
/// the wrong order.
pub fn canny(gray: &Frame, low: f64, high: f64, aperture: u8, l2_gradient: bool) -> Frame {
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let (low, high) = (low as f32, high as f32);
    let (w, h) = (gray.width as usize, gray.height as usize);

    let (gx, gy) = sobel(gray, aperture);
    let magnitude: Vec<f32> = gx
        .iter()
        .zip(&gy)
        .map(|(&dx, &dy)| {
            if l2_gradient {
                (dx * dx + dy * dy).sqrt()
            } else {
                dx.abs() + dy.abs()
            }
        })
        .collect();

    let mag_at = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            magnitude[y as usize * w + x as usize]
        }
    };

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            let m = magnitude[i];
            if m <= low {
                continue;
            }
            let (ax, ay) = (gx[i].abs(), gy[i].abs());
            let (x, y) = (x as isize, y as isize);
            let (before, after) = if ay <= ax * TAN_22_5 {
                (mag_at(x - 1, y), mag_at(x + 1, y))
            } else if ay >= ax * TAN_67_5 {
                (mag_at(x, y - 1), mag_at(x, y + 1))
            } else if (gx[i] > 0.0) == (gy[i] > 0.0) {
                (mag_at(x - 1, y - 1), mag_at(x + 1, y + 1))
            } else {
                (mag_at(x + 1, y - 1), mag_at(x - 1, y + 1))
            };
            if m > before && m >= after {
                class[i] = if m > high { 2 } else { 1 };
            }
        }
    }

    let mut out = vec![0u8; w * h];
    let mut stack: Vec<usize> = (0..w * h).filter(|&i| class[i] == 2).collect();
    for &i in &stack {
        out[i] = 255;
    }
    while let Some(i) = stack.pop() {
        let (x, y) = ((i % w) as isize, (i / w) as isize);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if class[n] == 1 && out[n] == 0 {
                    out[n] = 255;
                    stack.push(n);
                }
            }
        }
    }

    Frame {
        data: out,
        ..gray.clone()
    }
}
