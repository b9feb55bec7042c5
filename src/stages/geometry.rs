//! Flips and resampling over `image::imageops`

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Pixel, Rgb};

use crate::capture::frame::Frame;
use crate::pipeline::control::FlipAxis;

fn flip_as<P: Pixel<Subpixel = u8> + 'static>(frame: &mut Frame, axis: FlipAxis) {
    let (width, height) = (frame.width, frame.height);
    let Some(mut view) = ImageBuffer::<P, &mut [u8]>::from_raw(width, height, &mut frame.data[..])
    else {
        return;
    };
    if matches!(axis, FlipAxis::Horizontal | FlipAxis::Both) {
        imageops::flip_horizontal_in_place(&mut view);
    }
    if matches!(axis, FlipAxis::Vertical | FlipAxis::Both) {
        imageops::flip_vertical_in_place(&mut view);
    }
}

/// Mirror in place. `Vertical` flips rows (around the x axis), `Horizontal`
/// flips columns, `Both` does both.
pub fn flip(frame: &mut Frame, axis: FlipAxis) {
    match frame.channels {
        1 => flip_as::<Luma<u8>>(frame, axis),
        _ => flip_as::<Rgb<u8>>(frame, axis),
    }
}

fn resize_as<P>(src: &Frame, width: u32, height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let view = ImageBuffer::<P, &[u8]>::from_raw(src.width, src.height, &src.data[..])?;
    Some(imageops::resize(&view, width, height, FilterType::Triangle).into_raw())
}

/// Bilinear (triangle filter) resize.
pub fn resize(src: &Frame, width: u32, height: u32) -> Frame {
    if width == src.width && height == src.height {
        return src.clone();
    }
    let data = match src.channels {
        1 => resize_as::<Luma<u8>>(src, width, height),
        _ => resize_as::<Rgb<u8>>(src, width, height),
    };
    match data {
        Some(data) => Frame {
            data,
            width,
            height,
            ..src.clone()
        },
        // Buffer shorter than its geometry; nothing sensible to sample
        None => Frame {
            sequence: src.sequence,
            timestamp: src.timestamp,
            ..Frame::new(width, height, src.channels)
        },
    }
}

/// Half-size copy, never smaller than 1x1.
pub fn half(src: &Frame) -> Frame {
    resize(src, (src.width / 2).max(1), (src.height / 2).max(1))
}
