//! Reference color chart detection

use super::contours::{approx_polygon, area, bounding_box, find_contours, is_convex, perimeter, Point};
use super::draw::{polyline, rect, GREEN, RED};
use super::filter::adaptive_threshold;
use crate::capture::frame::Frame;

/// Patches needed before a chart is reported
pub const MIN_PATCHES: usize = 12;
const BLOCK_SIZE: u32 = 15;
const OFFSET: i32 = 5;
const MIN_PATCH_AREA: f64 = 36.0;
const POLY_EPSILON: f64 = 0.03;
/// Accepted patch area relative to the median patch
const SIZE_TOLERANCE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ChartDetection {
    /// Quadrilateral outline of every patch
    pub patches: Vec<Vec<Point>>,
    /// Inclusive bounding box of all patches
    pub bounds: (Point, Point),
}

/// Find a grid of similarly sized convex quadrilaterals.
pub fn detect(frame: &Frame) -> Option<ChartDetection> {
    let binary = adaptive_threshold(&frame.to_gray(), BLOCK_SIZE, OFFSET);
    let max_area = frame.len_pixels() as f64 / MIN_PATCHES as f64;

    let mut quads: Vec<(Vec<Point>, f64)> = Vec::new();
    for contour in find_contours(&binary) {
        if contour.hole || contour.points.len() < 8 {
            continue;
        }
        let epsilon = POLY_EPSILON * perimeter(&contour.points);
        let poly = approx_polygon(&contour.points, epsilon);
        if poly.len() != 4 || !is_convex(&poly) {
            continue;
        }
        let patch_area = area(&poly);
        if (MIN_PATCH_AREA..=max_area).contains(&patch_area) {
            quads.push((poly, patch_area));
        }
    }
    if quads.len() < MIN_PATCHES {
        return None;
    }

    let mut areas: Vec<f64> = quads.iter().map(|(_, a)| *a).collect();
    areas.sort_by(f64::total_cmp);
    let median = areas[areas.len() / 2];
    let patches: Vec<Vec<Point>> = quads
        .into_iter()
        .filter(|(_, a)| *a >= median / SIZE_TOLERANCE && *a <= median * SIZE_TOLERANCE)
        .map(|(poly, _)| poly)
        .collect();
    if patches.len() < MIN_PATCHES {
        return None;
    }

    let corners: Vec<Point> = patches.iter().flatten().copied().collect();
    let bounds = bounding_box(&corners)?;
    Some(ChartDetection { patches, bounds })
}

/// Draw a detected chart. A miss leaves the frame untouched.
pub fn annotate(frame: &mut Frame) -> Option<ChartDetection> {
    let detection = detect(frame)?;
    for patch in &detection.patches {
        polyline(frame, patch, true, GREEN, 2);
    }
    rect(frame, detection.bounds.0, detection.bounds.1, RED, 2);
    Some(detection)
}
