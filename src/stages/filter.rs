//! Neighborhood filters: median, Gaussian, bilateral, derivatives, thresholds

use crate::capture::frame::Frame;

/// Mirror index at the borders without repeating the edge sample.
#[inline]
pub(crate) fn reflect101(i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

#[inline]
fn clamp(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

/// Per-channel median over a `ksize`x`ksize` window, edges replicated.
pub fn median_blur(src: &Frame, ksize: u32) -> Frame {
    let (w, h, c) = (src.width as usize, src.height as usize, src.channels as usize);
    let r = (ksize / 2) as isize;
    let mut out = src.clone();
    let mut window = Vec::with_capacity((ksize * ksize) as usize);

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                window.clear();
                for dy in -r..=r {
                    let sy = clamp(y as isize + dy, h);
                    for dx in -r..=r {
                        let sx = clamp(x as isize + dx, w);
                        window.push(src.data[(sy * w + sx) * c + ch]);
                    }
                }
                let mid = window.len() / 2;
                let (_, median, _) = window.select_nth_unstable(mid);
                out.data[(y * w + x) * c + ch] = *median;
            }
        }
    }
    out
}

/// Normalized 1D Gaussian. A non-positive sigma is derived from the size.
pub fn gaussian_kernel(ksize: usize, sigma: f64) -> Vec<f32> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (ksize / 2) as f64;
    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Separable correlation, per channel, reflect-101 borders. Returns raw sums.
pub fn separable(src: &Frame, kx: &[f32], ky: &[f32]) -> Vec<f32> {
    let (w, h, c) = (src.width as usize, src.height as usize, src.channels as usize);
    let (rx, ry) = ((kx.len() / 2) as isize, (ky.len() / 2) as isize);

    let mut rows = vec![0f32; src.data.len()];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let mut acc = 0.0;
                for (k, weight) in kx.iter().enumerate() {
                    let sx = reflect101(x as isize + k as isize - rx, w);
                    acc += weight * src.data[(y * w + sx) * c + ch] as f32;
                }
                rows[(y * w + x) * c + ch] = acc;
            }
        }
    }

    let mut out = vec![0f32; src.data.len()];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let mut acc = 0.0;
                for (k, weight) in ky.iter().enumerate() {
                    let sy = reflect101(y as isize + k as isize - ry, h);
                    acc += weight * rows[(sy * w + x) * c + ch];
                }
                out[(y * w + x) * c + ch] = acc;
            }
        }
    }
    out
}

fn saturate(values: &[f32]) -> Vec<u8> {
    values
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect()
}

pub fn gaussian_blur(src: &Frame, ksize: usize, sigma: f64) -> Frame {
    let kernel = gaussian_kernel(ksize, sigma);
    Frame {
        data: saturate(&separable(src, &kernel, &kernel)),
        ..src.clone()
    }
}

/// Edge-preserving smoothing over a disk of diameter `d`.
pub fn bilateral_filter(src: &Frame, d: u32, sigma_color: f64, sigma_space: f64) -> Frame {
    let (w, h, c) = (src.width as usize, src.height as usize, src.channels as usize);
    let r = (d / 2) as isize;

    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let dist2 = (dx * dx + dy * dy) as f64;
            if dist2 <= (r * r) as f64 {
                let weight = (-dist2 / (2.0 * sigma_space * sigma_space)).exp() as f32;
                offsets.push((dx, dy, weight));
            }
        }
    }
    // Color distance is the sum of absolute channel differences
    let color_lut: Vec<f32> = (0..=255 * c)
        .map(|diff| {
            let diff = diff as f64;
            (-(diff * diff) / (2.0 * sigma_color * sigma_color)).exp() as f32
        })
        .collect();

    let mut out = src.clone();
    let mut acc = vec![0f32; c];
    for y in 0..h {
        for x in 0..w {
            let center = &src.data[(y * w + x) * c..(y * w + x + 1) * c];
            acc.iter_mut().for_each(|a| *a = 0.0);
            let mut norm = 0.0;
            for &(dx, dy, space_weight) in &offsets {
                let sx = reflect101(x as isize + dx, w);
                let sy = reflect101(y as isize + dy, h);
                let neighbor = &src.data[(sy * w + sx) * c..(sy * w + sx + 1) * c];
                let diff: usize = neighbor
                    .iter()
                    .zip(center)
                    .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs() as usize)
                    .sum();
                let weight = space_weight * color_lut[diff];
                for (a, &v) in acc.iter_mut().zip(neighbor) {
                    *a += weight * v as f32;
                }
                norm += weight;
            }
            let dst = &mut out.data[(y * w + x) * c..(y * w + x + 1) * c];
            for (d, a) in dst.iter_mut().zip(&acc) {
                *d = (a / norm).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Sobel derivative and smoothing taps for apertures 3, 5 and 7.
pub fn sobel_kernels(aperture: u8) -> (&'static [f32], &'static [f32]) {
    match aperture {
        7 => (
            &[-1.0, -4.0, -5.0, 0.0, 5.0, 4.0, 1.0],
            &[1.0, 6.0, 15.0, 20.0, 15.0, 6.0, 1.0],
        ),
        5 => (&[-1.0, -2.0, 0.0, 2.0, 1.0], &[1.0, 4.0, 6.0, 4.0, 1.0]),
        _ => (&[-1.0, 0.0, 1.0], &[1.0, 2.0, 1.0]),
    }
}

/// Horizontal and vertical gradients of a gray frame.
pub fn sobel(gray: &Frame, aperture: u8) -> (Vec<f32>, Vec<f32>) {
    let (deriv, smooth) = sobel_kernels(aperture);
    (separable(gray, deriv, smooth), separable(gray, smooth, deriv))
}

/// 5x5 Laplacian of a gray frame, negative responses saturate to 0.
pub fn laplacian5(gray: &Frame) -> Frame {
    const SECOND: [f32; 5] = [1.0, 0.0, -2.0, 0.0, 1.0];
    const SMOOTH: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];
    let dxx = separable(gray, &SECOND, &SMOOTH);
    let dyy = separable(gray, &SMOOTH, &SECOND);
    let sum: Vec<f32> = dxx.iter().zip(&dyy).map(|(a, b)| a + b).collect();
    Frame {
        data: saturate(&sum),
        ..gray.clone()
    }
}

/// Binary threshold: above `thresh` becomes 255 (0 when inverted).
pub fn threshold(gray: &Frame, thresh: u8, inverse: bool) -> Frame {
    let (above, below) = if inverse { (0, 255) } else { (255, 0) };
    Frame {
        data: gray
            .data
            .iter()
            .map(|&v| if v > thresh { above } else { below })
            .collect(),
        ..gray.clone()
    }
}

/// Local-mean threshold: 255 where a pixel exceeds the mean of its
/// `block`x`block` neighborhood minus `c`.
pub fn adaptive_threshold(gray: &Frame, block: u32, c: i32) -> Frame {
    let (w, h) = (gray.width as usize, gray.height as usize);
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0u64;
        for x in 0..w {
            row += gray.data[y * w + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row;
        }
    }

    let r = (block / 2) as usize;
    let mut out = gray.clone();
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((y1 - y0) * (x1 - x0)) as u64;
            let mean = ((sum + count / 2) / count) as i32;
            out.data[y * w + x] = if gray.data[y * w + x] as i32 > mean - c {
                255
            } else {
                0
            };
        }
    }
    out
}
