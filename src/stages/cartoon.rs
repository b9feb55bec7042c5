//! Cartoon effect: flattened colors inside a sketched edge mask

use super::filter::{bilateral_filter, laplacian5, median_blur, threshold};
use super::geometry::{half, resize};
use crate::capture::frame::Frame;

const MEDIAN_SIZE: u32 = 7;
const EDGE_THRESHOLD: u8 = 80;
const PASSES: usize = 7;
const BILATERAL_DIAMETER: u32 = 7;
const SIGMA_COLOR: f64 = 12.0;
const SIGMA_SPACE: f64 = 8.0;

pub fn cartoonify(src: &Frame) -> Frame {
    let gray = median_blur(&src.to_gray(), MEDIAN_SIZE);
    // Non-edges are 255
    let mask = threshold(&laplacian5(&gray), EDGE_THRESHOLD, true);

    let mut small = half(src);
    for _ in 0..PASSES {
        let tmp = bilateral_filter(&small, BILATERAL_DIAMETER, SIGMA_COLOR, SIGMA_SPACE);
        small = bilateral_filter(&tmp, BILATERAL_DIAMETER, SIGMA_COLOR, SIGMA_SPACE);
    }
    let big = resize(&small, src.width, src.height);

    let c = src.channels as usize;
    let mut out = Frame {
        data: vec![0; src.data.len()],
        ..src.clone()
    };
    for (i, &m) in mask.data.iter().enumerate() {
        if m != 0 {
            out.data[i * c..(i + 1) * c].copy_from_slice(&big.data[i * c..(i + 1) * c]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_image_survives() {
        let frame = Frame::from_raw(8, 6, 3, vec![120; 144]).unwrap();
        let out = cartoonify(&frame);
        assert_eq!(out.data, frame.data);
    }

    #[test]
    fn keeps_geometry_and_channels() {
        let gray = Frame::from_raw(9, 7, 1, (0..63).map(|v| (v * 4) as u8).collect()).unwrap();
        let out = cartoonify(&gray);
        assert_eq!((out.width, out.height, out.channels), (9, 7, 1));
    }

    #[test]
    fn strong_edges_turn_black() {
        let mut frame = Frame::new(24, 24, 3);
        for y in 0..24 {
            for x in 12..24 {
                frame.pixel_mut(x, y).copy_from_slice(&[255, 255, 255]);
            }
        }
        let out = cartoonify(&frame);
        // Dark side of the step carries a strong positive Laplacian
        assert_eq!(out.pixel(11, 12), &[0, 0, 0]);
        assert_eq!(out.pixel(2, 12), &[0, 0, 0]);
        assert_eq!(out.pixel(20, 12), &[255, 255, 255]);
    }
}
