//! Dilation, erosion and compound morphology

use crate::capture::frame::Frame;
use crate::pipeline::control::MorphOp;

/// Anchor-centered set of neighbor offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    offsets: Vec<(isize, isize)>,
}

impl StructuringElement {
    pub fn rect(width: u32, height: u32) -> Self {
        let (cx, cy) = ((width / 2) as isize, (height / 2) as isize);
        let offsets = (0..height as isize)
            .flat_map(|y| (0..width as isize).map(move |x| (x - cx, y - cy)))
            .collect();
        Self { offsets }
    }

    /// Ellipse inscribed in a `width`x`height` box.
    pub fn ellipse(width: u32, height: u32) -> Self {
        let (cx, cy) = ((width / 2) as isize, (height / 2) as isize);
        let r = cy as f64;
        let c = cx as f64;
        let mut offsets = Vec::new();
        for y in 0..height as isize {
            let dy = (y - cy) as f64;
            if dy.abs() > r {
                continue;
            }
            let dx = if r > 0.0 {
                (c * ((r * r - dy * dy) / (r * r)).sqrt()).round() as isize
            } else {
                cx
            };
            let x0 = (cx - dx).max(0);
            let x1 = (cx + dx + 1).min(width as isize);
            offsets.extend((x0..x1).map(|x| (x - cx, y - cy)));
        }
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn contains(&self, dx: isize, dy: isize) -> bool {
        self.offsets.contains(&(dx, dy))
    }
}

/// Neighborhood max (`dilate`) or min per channel. Out-of-frame neighbors
/// are ignored.
fn extremum(src: &Frame, element: &StructuringElement, take_max: bool) -> Frame {
    let (w, h, c) = (src.width as isize, src.height as isize, src.channels as usize);
    let mut out = src.clone();
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                let mut best = if take_max { u8::MIN } else { u8::MAX };
                for &(dx, dy) in &element.offsets {
                    let (sx, sy) = (x + dx, y + dy);
                    if sx < 0 || sy < 0 || sx >= w || sy >= h {
                        continue;
                    }
                    let v = src.data[(sy * w + sx) as usize * c + ch];
                    best = if take_max { best.max(v) } else { best.min(v) };
                }
                out.data[(y * w + x) as usize * c + ch] = best;
            }
        }
    }
    out
}

pub fn dilate(src: &Frame, element: &StructuringElement, iterations: u32) -> Frame {
    let mut out = src.clone();
    for _ in 0..iterations {
        out = extremum(&out, element, true);
    }
    out
}

pub fn erode(src: &Frame, element: &StructuringElement, iterations: u32) -> Frame {
    let mut out = src.clone();
    for _ in 0..iterations {
        out = extremum(&out, element, false);
    }
    out
}

pub fn morphology(src: &Frame, op: MorphOp, element: &StructuringElement) -> Frame {
    match op {
        MorphOp::Open => dilate(&erode(src, element, 1), element, 1),
        MorphOp::Close => erode(&dilate(src, element, 1), element, 1),
        MorphOp::Gradient => {
            let high = dilate(src, element, 1);
            let low = erode(src, element, 1);
            Frame {
                data: high
                    .data
                    .iter()
                    .zip(&low.data)
                    .map(|(a, b)| a.saturating_sub(*b))
                    .collect(),
                ..high
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(size: u32) -> Frame {
        let mut frame = Frame::new(size, size, 1);
        let mid = size / 2;
        frame.pixel_mut(mid, mid)[0] = 255;
        frame
    }

    #[test]
    fn ellipse_5x5_drops_corners() {
        let element = StructuringElement::ellipse(5, 5);
        assert_eq!(element.len(), 17);
        assert!(element.contains(0, -2));
        assert!(!element.contains(-1, -2));
        assert!(element.contains(-2, -1));
    }

    #[test]
    fn dilate_grows_and_erode_shrinks() {
        let element = StructuringElement::rect(3, 3);
        let grown = dilate(&dot(7), &element, 2);
        assert_eq!(grown.data.iter().filter(|&&v| v == 255).count(), 25);
        let shrunk = erode(&grown, &element, 2);
        assert_eq!(shrunk.data, dot(7).data);
    }

    #[test]
    fn opening_removes_specks() {
        let element = StructuringElement::ellipse(5, 5);
        let opened = morphology(&dot(9), MorphOp::Open, &element);
        assert!(opened.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn gradient_is_outline() {
        let element = StructuringElement::rect(3, 3);
        let flat = Frame::from_raw(4, 4, 1, vec![60; 16]).unwrap();
        let edges = morphology(&flat, MorphOp::Gradient, &element);
        assert!(edges.data.iter().all(|&v| v == 0));
    }
}
