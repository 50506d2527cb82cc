//! Cubic interpolating spline over a waypoint sequence
//!
//! The spline is parameterised by cumulative euclidean distance in joint
//! space, normalised to [0, 1], and interpolates every waypoint with a
//! natural cubic in each joint.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector6;

use super::config_dist;
use crate::arm_model::NUM_JOINTS;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A time-parameterised joint-space curve `s: [0, 1] -> R^6`.
#[derive(Debug, Clone)]
pub struct Spline {
    /// Normalised knot parameters, strictly increasing from 0 to 1.
    knots: Vec<f64>,

    /// Waypoint values at each knot.
    values: Vec<Vector6<f64>>,

    /// Second derivatives at each knot (zero at the ends for a natural
    /// spline).
    second_derivs: Vec<Vector6<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Spline {
    /// Fit a natural cubic spline through the given waypoints.
    ///
    /// Consecutive duplicate waypoints are merged. A degenerate sequence
    /// (all waypoints equal, or a single waypoint) produces a constant
    /// spline.
    pub fn fit(waypoints: &[Vector6<f64>]) -> Self {
        // Merge consecutive duplicates so knot spacing is strictly positive
        let mut points: Vec<Vector6<f64>> = Vec::with_capacity(waypoints.len());
        for wp in waypoints {
            match points.last() {
                Some(last) if config_dist(wp, last) == 0.0 => continue,
                _ => points.push(*wp),
            }
        }

        if points.len() < 2 {
            let value = points.first().copied().unwrap_or_else(Vector6::zeros);
            return Self {
                knots: vec![0.0, 1.0],
                values: vec![value, value],
                second_derivs: vec![Vector6::zeros(), Vector6::zeros()],
            };
        }

        // Knots from cumulative joint-space distance, normalised to [0, 1]
        let mut knots = Vec::with_capacity(points.len());
        knots.push(0.0);
        for i in 1..points.len() {
            let dist = config_dist(&points[i], &points[i - 1]);
            knots.push(knots[i - 1] + dist);
        }
        let total = knots[points.len() - 1];
        for knot in knots.iter_mut() {
            *knot /= total;
        }

        let second_derivs = solve_natural(&knots, &points);

        Self {
            knots,
            values: points,
            second_derivs,
        }
    }

    /// Evaluate the spline at `t`, clamped to [0, 1].
    pub fn pos(&self, t: f64) -> Vector6<f64> {
        let t = t.clamp(0.0, 1.0);

        // Find the segment containing t
        let seg = match self.knots.partition_point(|&k| k <= t) {
            0 => 0,
            i if i >= self.knots.len() => self.knots.len() - 2,
            i => i - 1,
        };

        let t0 = self.knots[seg];
        let t1 = self.knots[seg + 1];
        let h = t1 - t0;

        let a = (t1 - t) / h;
        let b = (t - t0) / h;

        let mut out = Vector6::zeros();
        for j in 0..NUM_JOINTS {
            let y0 = self.values[seg][j];
            let y1 = self.values[seg + 1][j];
            let m0 = self.second_derivs[seg][j];
            let m1 = self.second_derivs[seg + 1][j];

            out[j] = a * y0
                + b * y1
                + ((a * a * a - a) * m0 + (b * b * b - b) * m1) * h * h / 6.0;
        }

        out
    }

    /// The number of interpolated waypoints.
    pub fn num_waypoints(&self) -> usize {
        self.values.len()
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Solve for the knot second derivatives of a natural cubic spline with the
/// Thomas algorithm, once per joint.
fn solve_natural(knots: &[f64], values: &[Vector6<f64>]) -> Vec<Vector6<f64>> {
    let n = knots.len();
    let mut second_derivs = vec![Vector6::zeros(); n];

    // Two knots make a straight line, the natural boundary handles it
    if n < 3 {
        return second_derivs;
    }

    let interior = n - 2;

    for j in 0..NUM_JOINTS {
        // Tridiagonal system over the interior knots
        let mut diag = vec![0.0; interior];
        let mut upper = vec![0.0; interior];
        let mut rhs = vec![0.0; interior];

        for i in 0..interior {
            let h_prev = knots[i + 1] - knots[i];
            let h_next = knots[i + 2] - knots[i + 1];

            diag[i] = (h_prev + h_next) / 3.0;
            upper[i] = h_next / 6.0;
            rhs[i] = (values[i + 2][j] - values[i + 1][j]) / h_next
                - (values[i + 1][j] - values[i][j]) / h_prev;
        }

        // Forward sweep: the sub-diagonal equals the previous row's upper
        for i in 1..interior {
            let lower = upper[i - 1];
            let factor = lower / diag[i - 1];
            diag[i] -= factor * upper[i - 1];
            rhs[i] -= factor * rhs[i - 1];
        }

        // Back substitution
        let mut solution = vec![0.0; interior];
        solution[interior - 1] = rhs[interior - 1] / diag[interior - 1];
        for i in (0..interior - 1).rev() {
            solution[i] = (rhs[i] - upper[i] * solution[i + 1]) / diag[i];
        }

        for i in 0..interior {
            second_derivs[i + 1][j] = solution[i];
        }
    }

    second_derivs
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_interpolates_waypoints() {
        let waypoints = vec![
            Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            Vector6::new(0.2, -0.1, 0.3, 0.0, 0.1, 0.0),
            Vector6::new(0.5, -0.3, 0.4, 0.0, 0.2, 0.0),
        ];

        let spline = Spline::fit(&waypoints);

        // Endpoints are exact
        assert!((spline.pos(0.0) - waypoints[0]).norm() < 1e-12);
        assert!((spline.pos(1.0) - waypoints[2]).norm() < 1e-12);

        // The interior waypoint sits at its normalised distance knot
        let d1 = (waypoints[1] - waypoints[0]).norm();
        let d2 = (waypoints[2] - waypoints[1]).norm();
        let t1 = d1 / (d1 + d2);
        assert!((spline.pos(t1) - waypoints[1]).norm() < 1e-9);
    }

    #[test]
    fn test_two_waypoints_is_linear() {
        let a = Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let b = Vector6::new(1.0, -1.0, 0.5, 0.0, 0.2, 0.0);

        let spline = Spline::fit(&[a, b]);

        let mid = spline.pos(0.5);
        assert!((mid - (a + b) * 0.5).norm() < 1e-12);
    }

    #[test]
    fn test_degenerate_waypoints() {
        let a = Vector6::new(0.1, 0.2, 0.3, 0.4, 0.5, 0.6);

        // All waypoints identical: constant spline
        let spline = Spline::fit(&[a, a, a]);
        assert!((spline.pos(0.0) - a).norm() < 1e-12);
        assert!((spline.pos(0.7) - a).norm() < 1e-12);
        assert!((spline.pos(1.0) - a).norm() < 1e-12);
    }

    #[test]
    fn test_clamps_parameter() {
        let a = Vector6::zeros();
        let b = Vector6::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let spline = Spline::fit(&[a, b]);

        assert!((spline.pos(-0.5) - a).norm() < 1e-12);
        assert!((spline.pos(1.5) - b).norm() < 1e-12);
    }
}
