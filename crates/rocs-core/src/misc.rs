//! Small numeric helpers: comparisons, time-array lookup, linear
//! interpolation and trapezoidal integration.

use crate::types::{Matrix, Scalar, Vector};

/// Tolerance used for time comparisons.
pub const WEAK_EPSILON: Scalar = 1e-9;

/// Weak floating-point equality.
pub fn almost_eq(a: Scalar, b: Scalar) -> bool {
    (a - b).abs() <= WEAK_EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Weak greater-or-equal.
pub fn almost_ge(a: Scalar, b: Scalar) -> bool {
    a > b || almost_eq(a, b)
}

/// Index of the interval of the sorted array `times` that contains `t`,
/// clamped to `[0, times.len() - 2]`. Returns 0 for arrays shorter than two.
pub fn interval_index(times: &[Scalar], t: Scalar) -> usize {
    if times.len() < 2 {
        return 0;
    }
    let upper = times.partition_point(|&ti| ti <= t);
    upper.saturating_sub(1).min(times.len() - 2)
}

/// Interpolation coefficient within the interval found by [`interval_index`].
pub fn interval_alpha(times: &[Scalar], index: usize, t: Scalar) -> Scalar {
    if times.len() < 2 {
        return 0.0;
    }
    let (t0, t1) = (times[index], times[index + 1]);
    if (t1 - t0).abs() < WEAK_EPSILON {
        0.0
    } else {
        ((t - t0) / (t1 - t0)).clamp(0.0, 1.0)
    }
}

/// Linear interpolation of a vector trajectory, holding the end values
/// outside the time range.
pub fn interpolate_vector(times: &[Scalar], values: &[Vector], t: Scalar) -> Vector {
    debug_assert_eq!(times.len(), values.len());
    match values.len() {
        0 => Vector::zeros(0),
        1 => values[0].clone(),
        _ => {
            let i = interval_index(times, t);
            let alpha = interval_alpha(times, i, t);
            &values[i] * (1.0 - alpha) + &values[i + 1] * alpha
        }
    }
}

/// Linear interpolation of a matrix trajectory, holding the end values.
pub fn interpolate_matrix(times: &[Scalar], values: &[Matrix], t: Scalar) -> Matrix {
    debug_assert_eq!(times.len(), values.len());
    match values.len() {
        0 => Matrix::zeros(0, 0),
        1 => values[0].clone(),
        _ => {
            let i = interval_index(times, t);
            let alpha = interval_alpha(times, i, t);
            &values[i] * (1.0 - alpha) + &values[i + 1] * alpha
        }
    }
}

/// Linear interpolation of a scalar trajectory, holding the end values.
pub fn interpolate_scalar(times: &[Scalar], values: &[Scalar], t: Scalar) -> Scalar {
    debug_assert_eq!(times.len(), values.len());
    match values.len() {
        0 => 0.0,
        1 => values[0],
        _ => {
            let i = interval_index(times, t);
            let alpha = interval_alpha(times, i, t);
            values[i] * (1.0 - alpha) + values[i + 1] * alpha
        }
    }
}

/// Trapezoidal integral of samples `values` over the grid `times`.
///
/// Repeated times (event nodes) contribute a zero-width trapezoid, so jumps
/// do not pollute the integral.
pub fn trapezoidal_integral(times: &[Scalar], values: &[Scalar]) -> Scalar {
    debug_assert_eq!(times.len(), values.len());
    let mut integral = 0.0;
    for k in 1..times.len() {
        integral += 0.5 * (times[k] - times[k - 1]) * (values[k] + values[k - 1]);
    }
    integral
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_lookup_clamps_to_range() {
        let times = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(interval_index(&times, -1.0), 0);
        assert_eq!(interval_index(&times, 0.5), 0);
        assert_eq!(interval_index(&times, 2.5), 2);
        assert_eq!(interval_index(&times, 9.0), 2);
    }

    #[test]
    fn interpolation_holds_end_values() {
        let times = [0.0, 1.0];
        let values = [Vector::from_vec(vec![1.0]), Vector::from_vec(vec![3.0])];
        assert_eq!(interpolate_vector(&times, &values, -1.0)[0], 1.0);
        assert_eq!(interpolate_vector(&times, &values, 0.5)[0], 2.0);
        assert_eq!(interpolate_vector(&times, &values, 5.0)[0], 3.0);
    }

    #[test]
    fn trapezoid_matches_linear_ramp() {
        let times: Vec<Scalar> = (0..11).map(|k| k as Scalar * 0.1).collect();
        let values: Vec<Scalar> = times.iter().map(|&t| 2.0 * t).collect();
        assert!((trapezoidal_integral(&times, &values) - 1.0).abs() < 1e-12);
    }
}
