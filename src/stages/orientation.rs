//! Blob orientation from the principal axes of each contour

use std::f64::consts::FRAC_PI_2;

use super::complex::Complex;
use super::contours::{area, find_contours, Point};
use super::draw::{circle, line, polyline, CYAN, MAGENTA, RED, YELLOW};
use super::filter::threshold;
use crate::capture::frame::Frame;

const THRESHOLD: u8 = 160;
const MIN_AREA: f64 = 320.0;
const MAX_AREA: f64 = 32_000.0;
/// Axis length per unit of eigenvalue
const AXIS_SCALE: f64 = 0.02;

/// Principal components of a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axes {
    pub center: Complex,
    /// Major axis, scaled by its eigenvalue
    pub major: Complex,
    /// Minor axis, scaled by its eigenvalue
    pub minor: Complex,
}

impl Axes {
    /// Orientation of the major axis in radians.
    pub fn angle(&self) -> f64 {
        self.major.arg()
    }
}

/// PCA of the contour points. The covariance `[[a, b], [b, c]]` has its
/// major axis at `arg(a - c + 2bi) / 2`.
pub fn principal_axes(points: &[Point]) -> Option<Axes> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let center = points
        .iter()
        .fold(Complex::ZERO, |acc, p| acc + Complex::new(p.x as f64, p.y as f64))
        .scale(1.0 / n);

    let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
    for p in points {
        let d = Complex::new(p.x as f64, p.y as f64) - center;
        a += d.re * d.re;
        b += d.re * d.im;
        c += d.im * d.im;
    }
    let (a, b, c) = (a / n, b / n, c / n);

    let spread = Complex::new(a - c, 2.0 * b);
    let theta = spread.arg() / 2.0;
    let mid = (a + c) / 2.0;
    let radius = spread.norm() / 2.0;

    Some(Axes {
        center,
        major: Complex::from_polar(mid + radius, theta),
        minor: Complex::from_polar(mid - radius, theta + FRAC_PI_2),
    })
}

fn to_point(z: Complex) -> Point {
    Point::new(z.re.round() as i32, z.im.round() as i32)
}

/// Outline bright blobs of plausible size and draw their axes. Gray frames
/// are promoted to RGB so the overlay keeps its colors. Returns the axes
/// that were drawn.
pub fn annotate(frame: &mut Frame) -> Vec<Axes> {
    let mask = threshold(&frame.to_gray(), THRESHOLD, false);
    let contours = find_contours(&mask);
    if !frame.is_color() {
        *frame = frame.to_rgb();
    }

    let mut found = Vec::new();
    for contour in &contours {
        let blob_area = area(&contour.points);
        if !(MIN_AREA..=MAX_AREA).contains(&blob_area) {
            continue;
        }
        polyline(frame, &contour.points, true, RED, 1);

        let Some(axes) = principal_axes(&contour.points) else {
            continue;
        };
        let center = to_point(axes.center);
        circle(frame, center, 3, MAGENTA, 2);
        line(
            frame,
            center,
            to_point(axes.center + axes.major.scale(AXIS_SCALE)),
            YELLOW,
            2,
        );
        line(
            frame,
            center,
            to_point(axes.center + axes.minor.scale(AXIS_SCALE)),
            CYAN,
            1,
        );
        found.push(axes);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_segment_points_along_x() {
        let points: Vec<_> = (0..10).map(|x| Point::new(x, 5)).collect();
        let axes = principal_axes(&points).unwrap();
        assert!((axes.center.re - 4.5).abs() < 1e-9);
        assert!(axes.angle().abs() < 1e-9);
        assert!(axes.minor.norm() < 1e-9);
    }

    #[test]
    fn diagonal_points_at_45_degrees() {
        let points: Vec<_> = (0..10).map(|i| Point::new(i, i)).collect();
        let axes = principal_axes(&points).unwrap();
        assert!((axes.angle() - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
    }

    #[test]
    fn bright_bar_is_annotated() {
        let mut frame = Frame::new(80, 60, 1);
        for y in 25..35 {
            for x in 10..70 {
                frame.pixel_mut(x, y)[0] = 255;
            }
        }
        let found = annotate(&mut frame);
        assert_eq!(frame.channels, 3);
        assert_eq!(found.len(), 1);
        // Wider than tall: major axis is horizontal
        assert!(found[0].angle().abs() < 0.05 || (found[0].angle().abs() - std::f64::consts::PI).abs() < 0.05);
        assert_eq!(frame.pixel(10, 25), &RED);
    }

    #[test]
    fn small_and_dark_blobs_are_ignored() {
        let mut frame = Frame::new(40, 40, 3);
        for y in 5..10 {
            for x in 5..10 {
                frame.pixel_mut(x, y).copy_from_slice(&[255, 255, 255]);
            }
        }
        let before = frame.clone();
        assert!(annotate(&mut frame).is_empty());
        assert_eq!(frame.data, before.data);
    }
}
