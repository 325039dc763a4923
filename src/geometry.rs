//! # Segment Geometry
//!
//! Core 3D geometry used by the path cleanup algorithms.
//!
//! Positions are local NED offsets in meters from the arming origin, so plain
//! Euclidean math applies; there is no geodetic handling in this crate.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`point_line_distance`] | Distance from a point to the infinite line through two points |
//! | [`segment_segment_distance`] | Closest distance between two finite segments, with midpoint |
//!
//! ## Algorithm Notes
//!
//! ### Point-to-line distance
//!
//! Computed from the triangle spanned by the point and the two line points:
//! area via Heron's formula, then `distance = 2 * area / base`. This avoids
//! normalizing a direction vector. The radicand is clamped to zero because
//! floating-point rounding can push it slightly negative when the three
//! points are nearly collinear.
//!
//! ### Segment-to-segment distance
//!
//! Standard parametric minimization over both segments, with both parameters
//! clamped to `[0, 1]` so the result stays on the finite segments. Also
//! returns the point halfway between the two closest points, which the loop
//! detector later uses as the replacement waypoint for a pruned loop.

use crate::Point3;

/// Result of a closest-approach query between two line segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentDistance {
    /// Closest distance between any part of the two segments, in meters.
    pub distance: f32,
    /// Point halfway between the two closest points.
    pub midpoint: Point3,
}

impl SegmentDistance {
    /// Sentinel returned for near-parallel segment pairs (see
    /// [`segment_segment_distance`]).
    pub const MAX: SegmentDistance = SegmentDistance {
        distance: f32::MAX,
        midpoint: Point3::new(0.0, 0.0, 0.0),
    };
}

/// Distance from `point` to the infinite 3D line through `line1` and `line2`.
///
/// Returns `0.0` when `line1 == line2` (the line is degenerate and every
/// distance along it is equally meaningless, but the caller treats the point
/// as lying on the chord, which is the conservative answer for
/// simplification).
///
/// # Example
///
/// ```rust
/// use trailback::{Point3, geometry::point_line_distance};
///
/// let d = point_line_distance(
///     &Point3::new(5.0, 3.0, 0.0),
///     &Point3::new(0.0, 0.0, 0.0),
///     &Point3::new(10.0, 0.0, 0.0),
/// );
/// assert!((d - 3.0).abs() < 1e-5);
/// ```
pub fn point_line_distance(point: &Point3, line1: &Point3, line2: &Point3) -> f32 {
    // triangle side lengths
    let a = (point - line1).norm();
    let b = (line1 - line2).norm();
    let c = (line2 - point).norm();

    // degenerate line, avoid dividing by zero below
    if b == 0.0 {
        return 0.0;
    }

    // Heron's formula: area from the semiperimeter
    let s = (a + b + c) / 2.0;
    let area_squared = (s * (s - a) * (s - b) * (s - c)).max(0.0);
    let area = area_squared.sqrt();

    2.0 * area / b
}

/// Closest distance in 3D between the finite segments `p1..p2` and `p3..p4`,
/// plus the point halfway between the two closest points.
///
/// Near-parallel configurations (determinant of the minimization system close
/// to zero) return [`SegmentDistance::MAX`]. The loop detector never compares
/// adjacent segments, and a genuinely overlapping parallel pair is always
/// caught by a non-parallel neighboring pair, so the sentinel simply means
/// "no loop here".
pub fn segment_segment_distance(
    p1: &Point3,
    p2: &Point3,
    p3: &Point3,
    p4: &Point3,
) -> SegmentDistance {
    let line1 = p2 - p1;
    let line2 = p4 - p3;
    let start_diff = p1 - p3;

    // intermediate dot products, no physical meaning on their own
    let a = line1.dot(&line1);
    let b = line1.dot(&line2);
    let c = line2.dot(&line2);
    let d = line1.dot(&start_diff);
    let e = line2.dot(&start_diff);

    let denominator = a * c - b * b;
    if denominator.abs() < f32::EPSILON {
        return SegmentDistance::MAX;
    }

    // parameters of the closest points on each segment, clamped to stay
    // within the finite segments
    let t1 = ((b * e - c * d) / denominator).clamp(0.0, 1.0);
    let t2 = ((a * e - b * d) / denominator).clamp(0.0, 1.0);

    let closest1 = p1 + line1 * t1;
    let closest2 = p3 + line2 * t2;

    SegmentDistance {
        distance: (closest1 - closest2).norm(),
        midpoint: (closest1 + closest2) / 2.0,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
