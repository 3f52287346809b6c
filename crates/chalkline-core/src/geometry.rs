//! Stroke smoothing.
//!
//! Raw pointer samples are turned into a chain of quadratic curves: every
//! interior sample becomes a control point, and each curve ends halfway to the
//! next sample. The chain finishes with a straight line into the last sample.

use kurbo::{BezPath, Point, Rect};

/// Midpoint of two samples.
pub fn midpoint(a: Point, b: Point) -> Point {
    Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Build the smoothed path for a full sequence of samples.
///
/// Fewer than two samples produce an empty path (nothing visible).
pub fn smooth_path(points: &[Point]) -> BezPath {
    let mut path = BezPath::new();
    if points.len() < 2 {
        return path;
    }

    path.move_to(points[0]);
    for i in 1..points.len() - 1 {
        path.quad_to(points[i], midpoint(points[i], points[i + 1]));
    }
    path.line_to(points[points.len() - 1]);

    path
}

/// The trailing part of [`smooth_path`] that changes when the last sample arrives.
///
/// Appending a sample only replaces the final straight line with a curve and a
/// new line, so live feedback can draw this tail instead of the whole gesture.
pub fn live_tail(points: &[Point]) -> BezPath {
    let n = points.len();
    let mut path = BezPath::new();
    match n {
        0 | 1 => {}
        2 => {
            path.move_to(points[0]);
            path.line_to(points[1]);
        }
        _ => {
            let start = if n == 3 {
                points[0]
            } else {
                midpoint(points[n - 3], points[n - 2])
            };
            path.move_to(start);
            path.quad_to(points[n - 2], midpoint(points[n - 2], points[n - 1]));
            path.line_to(points[n - 1]);
        }
    }
    path
}

/// Axis-aligned bounds of the samples, or `None` when empty.
pub fn bounds(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let mut rect = Rect::from_points(*first, *first);
    for point in &points[1..] {
        rect = rect.union_pt(*point);
    }
    Some(rect)
}
