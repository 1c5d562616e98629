//! Contour geometry: polygon moments, oriented bounding box and long-axis
//! orientation.

use imageproc::geometry::min_area_rect;
use imageproc::point::Point;

use super::AngleConvention;

/// Zeroth and first order moments of a closed polygon.
///
/// Values are kept doubled/sextupled as exact integers; `m00 == 0` is an exact
/// test for a degenerate contour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Moments {
    twice_area: i64,
    sum_x: i64,
    sum_y: i64,
}

impl Moments {
    pub fn m00(&self) -> f64 {
        self.twice_area as f64 / 2.0
    }

    pub fn is_degenerate(&self) -> bool {
        self.twice_area == 0
    }

    /// Unsigned enclosed area.
    pub fn area(&self) -> f64 {
        self.m00().abs()
    }

    /// Centroid truncated toward zero, or `None` for a degenerate contour.
    pub fn centroid(&self) -> Option<(i32, i32)> {
        if self.is_degenerate() {
            return None;
        }
        let denom = 3.0 * self.twice_area as f64;
        Some((
            (self.sum_x as f64 / denom) as i32,
            (self.sum_y as f64 / denom) as i32,
        ))
    }
}

/// Moments of the polygon through `points` (Green's theorem).
pub fn polygon_moments(points: &[Point<i32>]) -> Moments {
    let mut moments = Moments {
        twice_area: 0,
        sum_x: 0,
        sum_y: 0,
    };
    let n = points.len();
    if n < 3 {
        return moments;
    }
    for i in 0..n {
        let (x0, y0) = (points[i].x as i64, points[i].y as i64);
        let next = points[(i + 1) % n];
        let (x1, y1) = (next.x as i64, next.y as i64);
        let cross = x0 * y1 - x1 * y0;
        moments.twice_area += cross;
        moments.sum_x += (x0 + x1) * cross;
        moments.sum_y += (y0 + y1) * cross;
    }
    moments
}

fn spans_area(points: &[Point<i32>]) -> bool {
    let origin = points[0];
    let Some(other) = points.iter().find(|p| **p != origin) else {
        return false;
    };
    let (ax, ay) = ((other.x - origin.x) as i64, (other.y - origin.y) as i64);
    points.iter().any(|p| {
        let (bx, by) = ((p.x - origin.x) as i64, (p.y - origin.y) as i64);
        ax * by - ay * bx != 0
    })
}

/// Minimum-area rectangle around `points`, corners in consecutive order.
///
/// Returns `None` when the points do not span an area.
pub fn oriented_box(points: &[Point<i32>]) -> Option<[(f64, f64); 4]> {
    if points.len() < 3 || !spans_area(points) {
        return None;
    }
    let mut corners = min_area_rect(points).map(|p| (p.x as f64, p.y as f64));

    let cx = corners.iter().map(|c| c.0).sum::<f64>() / 4.0;
    let cy = corners.iter().map(|c| c.1).sum::<f64>() / 4.0;
    corners.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.total_cmp(&tb)
    });

    let twice_area: f64 = (0..4)
        .map(|i| {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            a.0 * b.1 - b.0 * a.1
        })
        .sum();
    if twice_area == 0.0 {
        return None;
    }
    Some(corners)
}

/// Fold any angle in degrees into (-90, 90].
pub fn fold_angle(degrees: f64) -> f64 {
    let mut folded = degrees % 180.0;
    if folded > 90.0 {
        folded -= 180.0;
    } else if folded <= -90.0 {
        folded += 180.0;
    }
    folded
}

/// Orientation of the rectangle's long axis against the image horizontal.
///
/// The axis runs between the midpoints of the two short edges. Image y
/// points down, so the vector is flipped before measuring.
pub fn long_axis_angle(corners: &[(f64, f64); 4], convention: AngleConvention) -> f64 {
    let mid = |i: usize| {
        let (a, b) = (corners[(i + 3) % 4], corners[i]);
        ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
    };
    let mids = [mid(0), mid(1), mid(2), mid(3)];
    let span = |i: usize| {
        let (a, b) = (mids[i], mids[i + 2]);
        (b.0 - a.0, b.1 - a.1)
    };
    let (d0, d1) = (span(0), span(1));
    let (dx, dy) = if d1.0.hypot(d1.1) > d0.0.hypot(d0.1) {
        d1
    } else {
        d0
    };

    let angle = fold_angle((-dy).atan2(dx).to_degrees());
    match convention {
        AngleConvention::CounterClockwise => angle,
        AngleConvention::Clockwise => fold_angle(-angle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: &[(i32, i32)]) -> Vec<Point<i32>> {
        raw.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn square_moments() {
        let square = pts(&[(0, 0), (10, 0), (10, 10), (0, 10)]);
        let m = polygon_moments(&square);
        assert_eq!(m.area(), 100.0);
        assert_eq!(m.centroid(), Some((5, 5)));
    }

    #[test]
    fn line_has_no_centroid() {
        let line = pts(&[(0, 0), (5, 0), (10, 0), (5, 0)]);
        let m = polygon_moments(&line);
        assert!(m.is_degenerate());
        assert_eq!(m.centroid(), None);
        assert!(oriented_box(&line).is_none());
        assert!(oriented_box(&pts(&[(3, 3), (3, 3), (3, 3)])).is_none());
    }

    #[test]
    fn rect_of_axis_aligned_box() {
        let boxed = pts(&[(2, 3), (7, 3), (12, 3), (12, 7), (2, 7), (6, 5)]);
        let rect = oriented_box(&boxed).unwrap();
        let xs: Vec<f64> = rect.iter().map(|c| c.0).collect();
        let ys: Vec<f64> = rect.iter().map(|c| c.1).collect();
        assert!((xs.iter().cloned().fold(f64::MAX, f64::min) - 2.0).abs() < 1e-9);
        assert!((xs.iter().cloned().fold(f64::MIN, f64::max) - 12.0).abs() < 1e-9);
        assert!((ys.iter().cloned().fold(f64::MAX, f64::min) - 3.0).abs() < 1e-9);
        assert!((ys.iter().cloned().fold(f64::MIN, f64::max) - 7.0).abs() < 1e-9);
        assert!(long_axis_angle(&rect, AngleConvention::CounterClockwise).abs() < 1e-9);
    }

    #[test]
    fn fold_keeps_open_closed_range() {
        assert_eq!(fold_angle(90.0), 90.0);
        assert_eq!(fold_angle(-90.0), 90.0);
        assert_eq!(fold_angle(180.0), 0.0);
        assert_eq!(fold_angle(-180.0), 0.0);
        assert!((fold_angle(170.0) + 10.0).abs() < 1e-9);
        assert!((fold_angle(-100.0) - 80.0).abs() < 1e-9);
    }

    #[test]
    fn rightward_lean_is_positive() {
        // Long axis from (0, 10) up-right to (20, 0) in image coordinates.
        let corners = [(0.0, 12.0), (-1.0, 10.0), (20.0, -2.0), (21.0, 0.0)];
        let ccw = long_axis_angle(&corners, AngleConvention::CounterClockwise);
        assert!(ccw > 0.0);
        let cw = long_axis_angle(&corners, AngleConvention::Clockwise);
        assert!((cw + ccw).abs() < 1e-9);
    }
}
