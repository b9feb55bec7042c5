use jpeg_decoder::Decoder;

use super::frame::{Frame, PixelFormat};
use crate::error::{Error, Result};

/// Decode a raw device buffer into a pipeline frame (RGB or gray).
pub fn decode_frame(data: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<Frame> {
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| Error::SourceRead(format!("MJPEG decode failed: {e}")))?;
            let info = decoder
                .info()
                .ok_or_else(|| Error::SourceRead("MJPEG header missing".into()))?;
            let channels = match info.pixel_format {
                jpeg_decoder::PixelFormat::RGB24 => 3,
                jpeg_decoder::PixelFormat::L8 => 1,
                _ => return Err(Error::UnsupportedFormat(format)),
            };
            Frame::from_raw(info.width as u32, info.height as u32, channels, pixels)
        }
        PixelFormat::Rgb24 => Frame::from_raw(width, height, 3, packed(data, width, height, 3)?),
        PixelFormat::Gray8 => Frame::from_raw(width, height, 1, packed(data, width, height, 1)?),
        PixelFormat::Bgr24 => {
            let mut pixels = packed(data, width, height, 3)?;
            for px in pixels.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Frame::from_raw(width, height, 3, pixels)
        }
        PixelFormat::Yuyv4 => Frame::from_raw(width, height, 3, yuyv_to_rgb(data, width, height)?),
        PixelFormat::Nv12 => Frame::from_raw(width, height, 3, nv12_to_rgb(data, width, height)?),
    }
}

/// Leading `width * height * channels` bytes; drivers may pad the buffer.
fn packed(data: &[u8], width: u32, height: u32, channels: usize) -> Result<Vec<u8>> {
    let len = width as usize * height as usize * channels;
    data.get(..len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::SourceRead(format!("short buffer: {} < {len}", data.len())))
}

/// BT.601 limited-range YCbCr to RGB.
#[inline]
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let c = (y as i32 - 16).max(0) * 298;
    let d = cb as i32 - 128;
    let e = cr as i32 - 128;
    let clamp = |v: i32| ((v + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ]
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(Error::InvalidFrame(format!("YUYV width {width} is odd")));
    }
    let src = packed(data, width, height, 2)?;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for quad in src.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    if w % 2 != 0 || h % 2 != 0 {
        return Err(Error::InvalidFrame(format!("NV12 size {w}x{h} is odd")));
    }
    let needed = w * h * 3 / 2;
    if data.len() < needed {
        return Err(Error::SourceRead(format!("short buffer: {} < {needed}", data.len())));
    }
    let (luma, chroma) = data.split_at(w * h);
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let uv = (y / 2) * w + (x / 2) * 2;
            rgb.extend_from_slice(&ycbcr_to_rgb(luma[y * w + x], chroma[uv], chroma[uv + 1]));
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let frame = decode_frame(&[1, 2, 3], 1, 1, PixelFormat::Bgr24).unwrap();
        assert_eq!(frame.data, vec![3, 2, 1]);
    }

    #[test]
    fn padded_rgb_buffer_is_trimmed() {
        let frame = decode_frame(&[9; 16], 2, 2, PixelFormat::Rgb24).unwrap();
        assert_eq!(frame.data.len(), 12);
    }

    #[test]
    fn short_buffer_is_an_error() {
        assert!(decode_frame(&[0; 5], 2, 2, PixelFormat::Gray8).is_err());
    }

    #[test]
    fn yuyv_black_and_white() {
        // Two pixels, black then white, neutral chroma
        let frame = decode_frame(&[16, 128, 235, 128], 2, 1, PixelFormat::Yuyv4).unwrap();
        assert_eq!(&frame.data[..3], &[0, 0, 0]);
        assert_eq!(&frame.data[3..], &[255, 255, 255]);
    }

    #[test]
    fn nv12_gray_plane() {
        let mut buf = vec![235; 4];
        buf.extend_from_slice(&[128, 128]);
        let frame = decode_frame(&buf, 2, 2, PixelFormat::Nv12).unwrap();
        assert!(frame.data.iter().all(|&v| v == 255));
    }

    #[test]
    fn garbage_mjpeg_fails() {
        assert!(decode_frame(&[0, 1, 2, 3], 2, 2, PixelFormat::Mjpeg).is_err());
    }
}
