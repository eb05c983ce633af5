//! SVG path generation for route lines.
//!
//! Lines are smoothed with a chain of quadratic curves: each interior point
//! is a control point and the curve ends at the midpoint towards the next
//! point. The chain closes with a degenerate curve onto the last point.
//! This is not a true interpolating spline, which keeps it cheap.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::{Point, RouteLine};

/// Stroke width for an image whose longest side is `REFERENCE_DIMENSION`.
pub const BASE_STROKE_WIDTH: f64 = 4.0;

pub const REFERENCE_DIMENSION: f64 = 1000.0;

/// Strokes never get thinner than this.
pub const MIN_STROKE_WIDTH: f64 = 1.5;

/// Build the SVG path `d` attribute for a point sequence.
///
/// Fewer than two points draw nothing, two points draw a straight segment.
pub fn render_path(points: &[Point]) -> String {
    match points {
        [] | [_] => String::new(),
        [a, b] => format!("M {} {} L {} {}", a.x, a.y, b.x, b.y),
        [first, .., last] => {
            let mut d = format!("M {} {}", first.x, first.y);
            for pair in points[1..].windows(2) {
                let (control, next) = (&pair[0], &pair[1]);
                let mid = control.midpoint(next);
                // Writing to a String cannot fail
                let _ = write!(d, " Q {} {} {} {}", control.x, control.y, mid.x, mid.y);
            }
            let _ = write!(d, " Q {} {} {} {}", last.x, last.y, last.x, last.y);
            d
        }
    }
}

/// Stroke width for a photo of the given pixel size. Larger photos get
/// thinner strokes relative to their size, clamped to `MIN_STROKE_WIDTH`.
pub fn stroke_width(width: u32, height: u32) -> f64 {
    let longest = width.max(height);
    if longest == 0 {
        return BASE_STROKE_WIDTH;
    }
    (BASE_STROKE_WIDTH * REFERENCE_DIMENSION / f64::from(longest)).max(MIN_STROKE_WIDTH)
}

/// Everything needed to draw one route line over a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePreview {
    pub path: String,
    pub stroke_width: f64,
    pub color: String,
}

impl RoutePreview {
    pub fn new(points: &[Point], color: &str, dimensions: Option<(u32, u32)>) -> Self {
        Self {
            path: render_path(points),
            stroke_width: dimensions
                .map(|(w, h)| stroke_width(w, h))
                .unwrap_or(BASE_STROKE_WIDTH),
            color: color.to_string(),
        }
    }

    pub fn for_line(line: &RouteLine, dimensions: Option<(u32, u32)>) -> Self {
        Self::new(&line.points, &line.color, dimensions)
    }
}
