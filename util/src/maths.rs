//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T>
where
    T: Float + std::ops::AddAssign,
{
    // Check that the dimentions match
    if point_0.len() != point_1.len() {
        return None;
    }

    let mut sum = T::from(0).unwrap();

    for i in 0..point_0.len() {
        sum += (point_0[i] - point_1[i]).powi(2);
    }

    Some(sum.sqrt())
}

/// Clamp a value between a minimum and maximum.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Get the signed angular distance between two angles.
///
/// This function will return the shortest signed distance from `a` to `b`,
/// accounting for wrapping between 0 and 2pi, so that
/// `a + ang_dist_2pi(a, b) == b (mod 2pi)`.
pub fn ang_dist_2pi<T>(a: T, b: T) -> T
where
    T: Float + std::ops::Rem,
{
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap();

    let c = rem_euclid(a - b, tau_t);
    let d = rem_euclid(b - a, tau_t);

    if c < d {
        -c
    } else {
        d
    }
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float + std::ops::Rem,
{
    let r = lhs % rhs;
    if r < T::from(0.0).unwrap() {
        r + rhs.abs()
    } else {
        r
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_norm() {
        assert_eq!(norm(&[0f64, 0f64], &[3f64, 4f64]), Some(5f64));
        assert_eq!(norm::<f64>(&[0f64], &[1f64, 2f64]), None);

        let a = [0.1f64, -0.2, 0.3, 0.0, 1.0, -1.0];
        assert_eq!(norm(&a, &a), Some(0f64));
    }

    #[test]
    fn test_ang_dist_2pi() {
        const TAU: f64 = std::f64::consts::TAU;

        assert_eq!(ang_dist_2pi(1f64, 2f64), 1f64);
        assert_eq!(ang_dist_2pi(2f64, 1f64), -1f64);
        assert_eq!(ang_dist_2pi(0f64, TAU), 0f64);
        assert_eq!(ang_dist_2pi(TAU, 0f64), 0f64);
        assert_eq!(ang_dist_2pi(1f64, TAU), -1f64);
        assert_eq!(ang_dist_2pi(0f64, TAU - 1f64), -1f64);
        assert_eq!(ang_dist_2pi(TAU - 1f64, 1f64), 2f64);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(&1.5f64, &-1.0, &1.0), 1.0);
        assert_eq!(clamp(&-1.5f64, &-1.0, &1.0), -1.0);
        assert_eq!(clamp(&0.5f64, &-1.0, &1.0), 0.5);
    }
}
