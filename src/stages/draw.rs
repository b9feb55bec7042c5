//! Overlay primitives over `imageproc::drawing`: lines, circles, rectangles,
//! polylines

use image::{ImageBuffer, Luma, Pixel, Rgb};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

use super::contours::Point;
use crate::capture::frame::{luma, Frame};

pub type Color = [u8; 3];

pub const RED: Color = [255, 0, 0];
pub const GREEN: Color = [0, 255, 0];
pub const YELLOW: Color = [255, 255, 0];
pub const CYAN: Color = [0, 255, 255];
pub const MAGENTA: Color = [255, 0, 255];

/// Pixel types a frame can be viewed as.
trait Ink: Pixel<Subpixel = u8> + 'static {
    fn ink(color: Color) -> Self;
}

impl Ink for Rgb<u8> {
    fn ink(color: Color) -> Self {
        Rgb(color)
    }
}

impl Ink for Luma<u8> {
    fn ink(color: Color) -> Self {
        Luma([luma(color[0], color[1], color[2])])
    }
}

type View<'a, P> = ImageBuffer<P, &'a mut [u8]>;

enum Shape<'a> {
    Line(Point, Point),
    Circle(Point, i32),
    Polyline(&'a [Point], bool),
    FilledRect(Point, Point),
}

fn paint(frame: &mut Frame, shape: Shape<'_>, color: Color, thickness: u32) {
    let (width, height, channels) = (frame.width, frame.height, frame.channels);
    let data = &mut frame.data[..];
    match channels {
        1 => {
            if let Some(mut view) = View::<Luma<u8>>::from_raw(width, height, data) {
                draw(&mut view, &shape, Luma::ink(color), thickness);
            }
        }
        _ => {
            if let Some(mut view) = View::<Rgb<u8>>::from_raw(width, height, data) {
                draw(&mut view, &shape, Rgb::ink(color), thickness);
            }
        }
    }
}

fn draw<P: Ink>(view: &mut View<'_, P>, shape: &Shape<'_>, ink: P, thickness: u32) {
    match *shape {
        Shape::Line(from, to) => segment(view, from, to, ink, thickness),
        Shape::Circle(center, radius) => {
            let r = (thickness / 2) as i32;
            if radius <= 0 {
                stamp(view, center, ink, r);
                return;
            }
            for ring in (radius - r).max(0)..=radius + r {
                draw_hollow_circle_mut(view, (center.x, center.y), ring, ink);
            }
        }
        Shape::Polyline(points, closed) => {
            for pair in points.windows(2) {
                segment(view, pair[0], pair[1], ink, thickness);
            }
            if closed && points.len() > 2 {
                segment(view, points[points.len() - 1], points[0], ink, thickness);
            }
            if let [only] = points {
                stamp(view, *only, ink, (thickness / 2) as i32);
            }
        }
        Shape::FilledRect(a, b) => {
            let width = (a.x - b.x).unsigned_abs() + 1;
            let height = (a.y - b.y).unsigned_abs() + 1;
            let rect = Rect::at(a.x.min(b.x), a.y.min(b.y)).of_size(width, height);
            draw_filled_rect_mut(view, rect, ink);
        }
    }
}

/// A single point, or a filled disk for thick strokes.
fn stamp<P: Ink>(view: &mut View<'_, P>, at: Point, ink: P, radius: i32) {
    if radius == 0 {
        if at.x >= 0 && at.y >= 0 && (at.x as u32) < view.width() && (at.y as u32) < view.height()
        {
            view.put_pixel(at.x as u32, at.y as u32, ink);
        }
        return;
    }
    draw_filled_circle_mut(view, (at.x, at.y), radius, ink);
}

/// Thick segments are a bundle of offset segments covering a disk brush.
fn segment<P: Ink>(view: &mut View<'_, P>, from: Point, to: Point, ink: P, thickness: u32) {
    let r = (thickness / 2) as i32;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            draw_line_segment_mut(
                view,
                ((from.x + dx) as f32, (from.y + dy) as f32),
                ((to.x + dx) as f32, (to.y + dy) as f32),
                ink,
            );
        }
    }
}

/// Line with both endpoints drawn. Off-frame parts are clipped.
pub fn line(frame: &mut Frame, from: Point, to: Point, color: Color, thickness: u32) {
    paint(frame, Shape::Line(from, to), color, thickness);
}

/// Circle outline.
pub fn circle(frame: &mut Frame, center: Point, radius: i32, color: Color, thickness: u32) {
    paint(frame, Shape::Circle(center, radius), color, thickness);
}

pub fn polyline(frame: &mut Frame, points: &[Point], closed: bool, color: Color, thickness: u32) {
    paint(frame, Shape::Polyline(points, closed), color, thickness);
}

/// Filled axis-aligned rectangle between two inclusive corners.
pub fn fill_rect(frame: &mut Frame, a: Point, b: Point, color: Color) {
    paint(frame, Shape::FilledRect(a, b), color, 1);
}

pub fn rect(frame: &mut Frame, a: Point, b: Point, color: Color, thickness: u32) {
    let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)];
    polyline(frame, &corners, true, color, thickness);
}
