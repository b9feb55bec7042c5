//! Border tracing on binary masks and polygon helpers

use crate::capture::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One traced border, points in tracing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<Point>,
    /// Border of a hole rather than of a component
    pub hole: bool,
}

/// 8-neighborhood, counter-clockwise starting east (image y points down).
const NEIGHBORS: [(i32, i32); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// All borders of a single-channel mask (Suzuki-Abe). Non-zero is
/// foreground; outer borders and hole borders are both returned.
pub fn find_contours(mask: &Frame) -> Vec<Contour> {
    let (w, h) = (mask.width as usize, mask.height as usize);
    let stride = w + 2;

    // One pixel of zero padding so neighbor steps never leave the buffer
    let mut labels = vec![0i32; stride * (h + 2)];
    for y in 0..h {
        for x in 0..w {
            if mask.data[y * w + x] != 0 {
                labels[(y + 1) * stride + x + 1] = 1;
            }
        }
    }

    let mut deltas = [0isize; 16];
    for (i, (dx, dy)) in NEIGHBORS.iter().enumerate() {
        let delta = *dx as isize + *dy as isize * stride as isize;
        deltas[i] = delta;
        deltas[i + 8] = delta;
    }

    let mut contours = Vec::new();
    let mut nbd = 1;
    for y in 0..h {
        let mut pos = (y + 1) * stride + 1;
        for x in 0..w {
            let pix = labels[pos];
            if pix != 0 {
                let outer = pix == 1 && labels[pos - 1] == 0;
                let hole = !outer && pix >= 1 && labels[pos + 1] == 0;
                if outer || hole {
                    nbd += 1;
                    let start = Point::new(x as i32, y as i32);
                    contours.push(follow_border(&mut labels, pos, nbd, start, hole, &deltas));
                }
            }
            pos += 1;
        }
    }
    contours
}

fn follow_border(
    labels: &mut [i32],
    start: usize,
    nbd: i32,
    mut point: Point,
    hole: bool,
    deltas: &[isize; 16],
) -> Contour {
    let step = |pos: usize, dir: usize| (pos as isize + deltas[dir]) as usize;
    let mut points = Vec::new();

    let mut s: usize = if hole { 0 } else { 4 };
    let first_dir = s;
    let mut pos1;
    loop {
        s = (s + 7) & 7;
        pos1 = step(start, s);
        if labels[pos1] != 0 || s == first_dir {
            break;
        }
    }

    if s == first_dir {
        // Isolated pixel
        labels[start] = -nbd;
        points.push(point);
        return Contour { points, hole };
    }

    let mut pos3 = start;
    loop {
        let s_end = s;
        let mut pos4;
        loop {
            s = (s + 1) & 15;
            pos4 = step(pos3, s);
            if labels[pos4] != 0 {
                break;
            }
        }
        s &= 7;

        if s.wrapping_sub(1) < s_end {
            labels[pos3] = -nbd;
        } else if labels[pos3] == 1 {
            labels[pos3] = nbd;
        }

        points.push(point);
        point.x += NEIGHBORS[s].0;
        point.y += NEIGHBORS[s].1;

        if pos4 == start && pos3 == pos1 {
            break;
        }
        pos3 = pos4;
        s = (s + 4) & 7;
    }

    Contour { points, hole }
}

/// Unsigned shoelace area of a closed polygon.
pub fn area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    let mut prev = points[points.len() - 1];
    for &p in points {
        twice += prev.x as i64 * p.y as i64 - p.x as i64 * prev.y as i64;
        prev = p;
    }
    (twice as f64).abs() / 2.0
}

pub fn perimeter(points: &[Point]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut prev = points[points.len() - 1];
    for &p in points {
        let (dx, dy) = ((p.x - prev.x) as f64, (p.y - prev.y) as f64);
        total += (dx * dx + dy * dy).sqrt();
        prev = p;
    }
    total
}

/// Inclusive corners `(min, max)`.
pub fn bounding_box(points: &[Point]) -> Option<(Point, Point)> {
    let first = *points.first()?;
    let (mut min, mut max) = (first, first);
    for p in points {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Some((min, max))
}

/// True when every turn goes the same way. Collinear runs are ignored.
pub fn is_convex(polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64 - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            continue;
        }
        if sign == 0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0
}

/// Douglas-Peucker simplification of a closed contour.
pub fn approx_polygon(contour: &[Point], epsilon: f64) -> Vec<Point> {
    if contour.len() < 3 {
        return contour.to_vec();
    }
    let origin = contour[0];
    let far = (1..contour.len())
        .max_by_key(|&i| {
            let (dx, dy) = ((contour[i].x - origin.x) as i64, (contour[i].y - origin.y) as i64);
            dx * dx + dy * dy
        })
        .unwrap_or(1);

    let mut out = Vec::new();
    simplify_chain(&contour[..=far], epsilon, &mut out);
    let mut back: Vec<Point> = contour[far..].to_vec();
    back.push(origin);
    simplify_chain(&back, epsilon, &mut out);
    out
}

/// Pushes the kept points of an open chain, excluding its last point.
fn simplify_chain(chain: &[Point], epsilon: f64, out: &mut Vec<Point>) {
    if chain.len() < 2 {
        out.extend_from_slice(chain);
        return;
    }
    let mut stack = vec![(0usize, chain.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        let (a, b) = (chain[start], chain[end]);
        let mut max_dist = 0.0;
        let mut split = start;
        for (i, &p) in chain.iter().enumerate().take(end).skip(start + 1) {
            let d = segment_distance(p, a, b);
            if d > max_dist {
                max_dist = d;
                split = i;
            }
        }
        if max_dist > epsilon {
            stack.push((split, end));
            stack.push((start, split));
        } else {
            out.push(a);
        }
    }
}

fn segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = ((b.x - a.x) as f64, (b.y - a.y) as f64);
    let (px, py) = ((p.x - a.x) as f64, (p.y - a.y) as f64);
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return (px * px + py * py).sqrt();
    }
    (px * dy - py * dx).abs() / len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(width: u32, height: u32, on: impl Fn(u32, u32) -> bool) -> Frame {
        let mut frame = Frame::new(width, height, 1);
        for y in 0..height {
            for x in 0..width {
                if on(x, y) {
                    frame.pixel_mut(x, y)[0] = 255;
                }
            }
        }
        frame
    }

    #[test]
    fn filled_square_has_one_outer_border() {
        let m = mask(10, 10, |x, y| (2..7).contains(&x) && (3..8).contains(&y));
        let contours = find_contours(&m);
        assert_eq!(contours.len(), 1);
        assert!(!contours[0].hole);
        assert_eq!(area(&contours[0].points), 16.0);
        assert_eq!(
            bounding_box(&contours[0].points),
            Some((Point::new(2, 3), Point::new(6, 7)))
        );
    }

    #[test]
    fn ring_has_outer_and_hole_border() {
        let m = mask(5, 5, |x, y| (1..4).contains(&x) && (1..4).contains(&y) && !(x == 2 && y == 2));
        let contours = find_contours(&m);
        assert_eq!(contours.len(), 2);
        assert!(!contours[0].hole);
        assert!(contours[1].hole);
    }

    #[test]
    fn isolated_pixel() {
        let m = mask(3, 3, |x, y| x == 1 && y == 1);
        let contours = find_contours(&m);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points, vec![Point::new(1, 1)]);
    }

    #[test]
    fn square_simplifies_to_four_corners() {
        let m = mask(20, 20, |x, y| (3..15).contains(&x) && (4..14).contains(&y));
        let contours = find_contours(&m);
        let poly = approx_polygon(&contours[0].points, 1.0);
        assert_eq!(poly.len(), 4);
        assert!(is_convex(&poly));
    }

    #[test]
    fn concave_polygon() {
        let arrow = [
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 2),
            Point::new(2, 2),
            Point::new(2, 4),
            Point::new(0, 4),
        ];
        assert!(!is_convex(&arrow));
        assert_eq!(area(&arrow), 12.0);
        assert_eq!(perimeter(&arrow), 16.0);
    }
}
