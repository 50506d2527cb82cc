//! Segment-segment distance used by the self-collision check

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Point3;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Return the minimum distance between the segments `(p0, p1)` and
/// `(q0, q1)`.
///
/// Implements the standard clamped closest-point computation, handling
/// degenerate (zero length) segments.
pub fn segment_distance(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    q0: &Point3<f64>,
    q1: &Point3<f64>,
) -> f64 {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;

    let a = d1.dot(&d1);
    let e = d2.dot(&d2);
    let f = d2.dot(&r);

    // Both segments degenerate to points
    if a <= f64::EPSILON && e <= f64::EPSILON {
        return r.norm();
    }

    let (s, t);

    if a <= f64::EPSILON {
        // First segment is a point
        s = 0.0;
        t = (f / e).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(&r);

        if e <= f64::EPSILON {
            // Second segment is a point
            t = 0.0;
            s = (-c / a).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(&d2);
            let denom = a * e - b * b;

            // Parallel segments pick an arbitrary s, the clamping of t below
            // recovers the true minimum
            let mut s_val = if denom > f64::EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let mut t_val = (b * s_val + f) / e;

            // Clamp t and recompute s against the clamped value
            if t_val < 0.0 {
                t_val = 0.0;
                s_val = (-c / a).clamp(0.0, 1.0);
            } else if t_val > 1.0 {
                t_val = 1.0;
                s_val = ((b - c) / a).clamp(0.0, 1.0);
            }

            s = s_val;
            t = t_val;
        }
    }

    let closest_p = p0 + d1 * s;
    let closest_q = q0 + d2 * t;

    (closest_p - closest_q).norm()
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn p(x: f64, y: f64, z: f64) -> Point3<f64> {
        Point3::new(x, y, z)
    }

    #[test]
    fn test_crossing_segments() {
        // Perpendicular segments separated by 1 in z
        let d = segment_distance(
            &p(-1.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
            &p(0.0, -1.0, 1.0),
            &p(0.0, 1.0, 1.0),
        );
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_collinear_segments() {
        // Collinear with a gap of 0.5
        let d = segment_distance(
            &p(0.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
            &p(1.5, 0.0, 0.0),
            &p(2.5, 0.0, 0.0),
        );
        assert!((d - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_segments() {
        let d = segment_distance(
            &p(0.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
            &p(0.0, 0.3, 0.0),
            &p(1.0, 0.3, 0.0),
        );
        assert!((d - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_segments() {
        // Point to segment
        let d = segment_distance(
            &p(0.5, 2.0, 0.0),
            &p(0.5, 2.0, 0.0),
            &p(0.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
        );
        assert!((d - 2.0).abs() < 1e-12);

        // Point to point
        let d = segment_distance(
            &p(0.0, 0.0, 0.0),
            &p(0.0, 0.0, 0.0),
            &p(3.0, 4.0, 0.0),
            &p(3.0, 4.0, 0.0),
        );
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_endpoint_clamping() {
        // Closest approach is between endpoints, not interior points
        let d = segment_distance(
            &p(0.0, 0.0, 0.0),
            &p(1.0, 0.0, 0.0),
            &p(2.0, 1.0, 0.0),
            &p(3.0, 2.0, 0.0),
        );
        assert!((d - (2.0f64).sqrt()).abs() < 1e-12);
    }
}
