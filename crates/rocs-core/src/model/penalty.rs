//! Soft-constraint penalties
//!
//! Inequality constraints use the convention `h(x, u) >= 0`. A penalty
//! function maps each constraint row to a smooth scalar; the soft-constraint
//! penalty sums the rows and reduces a constraint linearization to a scalar
//! quadratic approximation by the chain rule.

use crate::types::{Scalar, ScalarFunctionQuadraticApproximation, Vector,
                   VectorFunctionLinearApproximation};

/// Smooth per-row penalty `p(h)`.
pub trait PenaltyFunction: Send {
    fn value(&self, time: Scalar, h: Scalar) -> Scalar;
    fn derivative(&self, time: Scalar, h: Scalar) -> Scalar;
    fn second_derivative(&self, time: Scalar, h: Scalar) -> Scalar;
    fn clone_boxed(&self) -> Box<dyn PenaltyFunction>;
}

impl Clone for Box<dyn PenaltyFunction> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Relaxed logarithmic barrier
///
/// `p(h) = -mu ln(h)` for `h > delta`, quadratically extended below the
/// relaxation margin so the penalty stays defined on infeasible points.
#[derive(Clone, Debug)]
pub struct RelaxedBarrierPenalty {
    pub mu: Scalar,
    pub delta: Scalar,
}

impl RelaxedBarrierPenalty {
    pub fn new(mu: Scalar, delta: Scalar) -> Self {
        Self { mu, delta }
    }
}

impl Default for RelaxedBarrierPenalty {
    fn default() -> Self {
        Self { mu: 0.1, delta: 1e-3 }
    }
}

impl PenaltyFunction for RelaxedBarrierPenalty {
    fn value(&self, _time: Scalar, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu * h.ln()
        } else {
            let z = (h - 2.0 * self.delta) / self.delta;
            self.mu * (0.5 * (z * z - 1.0) - self.delta.ln())
        }
    }

    fn derivative(&self, _time: Scalar, h: Scalar) -> Scalar {
        if h > self.delta {
            -self.mu / h
        } else {
            self.mu * (h - 2.0 * self.delta) / (self.delta * self.delta)
        }
    }

    fn second_derivative(&self, _time: Scalar, h: Scalar) -> Scalar {
        if h > self.delta {
            self.mu / (h * h)
        } else {
            self.mu / (self.delta * self.delta)
        }
    }

    fn clone_boxed(&self) -> Box<dyn PenaltyFunction> {
        Box::new(self.clone())
    }
}

/// Plain quadratic penalty on the violation `min(h, 0)`.
#[derive(Clone, Debug)]
pub struct QuadraticPenalty {
    pub scale: Scalar,
}

impl PenaltyFunction for QuadraticPenalty {
    fn value(&self, _time: Scalar, h: Scalar) -> Scalar {
        let v = h.min(0.0);
        0.5 * self.scale * v * v
    }

    fn derivative(&self, _time: Scalar, h: Scalar) -> Scalar {
        self.scale * h.min(0.0)
    }

    fn second_derivative(&self, _time: Scalar, h: Scalar) -> Scalar {
        if h < 0.0 {
            self.scale
        } else {
            0.0
        }
    }

    fn clone_boxed(&self) -> Box<dyn PenaltyFunction> {
        Box::new(self.clone())
    }
}

/// Sums a per-row penalty over a vector of constraint values.
#[derive(Clone)]
pub struct SoftConstraintPenalty {
    penalty: Box<dyn PenaltyFunction>,
}

impl Default for SoftConstraintPenalty {
    fn default() -> Self {
        Self::new(Box::new(RelaxedBarrierPenalty::default()))
    }
}

impl SoftConstraintPenalty {
    pub fn new(penalty: Box<dyn PenaltyFunction>) -> Self {
        Self { penalty }
    }

    /// Total penalty over all rows of `h`.
    pub fn value(&self, time: Scalar, h: &Vector) -> Scalar {
        h.iter().map(|&hi| self.penalty.value(time, hi)).sum()
    }

    /// Quadratic approximation of the summed penalty composed with a
    /// constraint linearization.
    pub fn quadratic_approximation(
        &self,
        time: Scalar,
        h: &VectorFunctionLinearApproximation,
    ) -> ScalarFunctionQuadraticApproximation {
        let nx = h.dfdx.ncols();
        let nu = h.dfdu.ncols();
        let n = h.num_rows();

        let mut first = Vector::zeros(n);
        let mut second = Vector::zeros(n);
        let mut approx = ScalarFunctionQuadraticApproximation::zero(nx, nu);
        for i in 0..n {
            approx.f += self.penalty.value(time, h.f[i]);
            first[i] = self.penalty.derivative(time, h.f[i]);
            second[i] = self.penalty.second_derivative(time, h.f[i]);
        }

        let second_dhdx = scale_rows(&second, &h.dfdx);
        approx.dfdx = h.dfdx.transpose() * &first;
        approx.dfdxx = h.dfdx.transpose() * &second_dhdx;
        if nu > 0 {
            let second_dhdu = scale_rows(&second, &h.dfdu);
            approx.dfdu = h.dfdu.transpose() * &first;
            approx.dfdux = h.dfdu.transpose() * &second_dhdx;
            approx.dfduu = h.dfdu.transpose() * &second_dhdu;
        }
        approx
    }
}

fn scale_rows(diag: &Vector, m: &crate::types::Matrix) -> crate::types::Matrix {
    let mut out = m.clone();
    for i in 0..out.nrows() {
        for j in 0..out.ncols() {
            out[(i, j)] *= diag[i];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn barrier_is_smooth_at_the_relaxation_margin() {
        let p = RelaxedBarrierPenalty::new(0.1, 1e-2);
        let eps = 1e-8;
        let below = p.value(0.0, p.delta - eps);
        let above = p.value(0.0, p.delta + eps);
        assert_relative_eq!(below, above, epsilon = 1e-5);
        let d_below = p.derivative(0.0, p.delta - eps);
        let d_above = p.derivative(0.0, p.delta + eps);
        assert_relative_eq!(d_below, d_above, epsilon = 1e-4);
    }

    #[test]
    fn quadratic_penalty_vanishes_on_feasible_points() {
        let p = QuadraticPenalty { scale: 10.0 };
        assert_eq!(p.value(0.0, 1.0), 0.0);
        assert!(p.value(0.0, -1.0) > 0.0);
    }

    #[test]
    fn soft_penalty_chain_rule_matches_finite_difference() {
        let penalty = SoftConstraintPenalty::new(Box::new(QuadraticPenalty { scale: 2.0 }));
        let mut h = VectorFunctionLinearApproximation::zero(1, 2, 1);
        h.f[0] = -0.3;
        h.dfdx[(0, 0)] = 1.0;
        h.dfdx[(0, 1)] = -2.0;
        h.dfdu[(0, 0)] = 0.5;

        let approx = penalty.quadratic_approximation(0.0, &h);
        // d p / d x = scale * h * dh/dx
        assert_relative_eq!(approx.dfdx[0], 2.0 * (-0.3) * 1.0, epsilon = 1e-12);
        assert_relative_eq!(approx.dfdx[1], 2.0 * (-0.3) * (-2.0), epsilon = 1e-12);
        assert_relative_eq!(approx.dfdu[0], 2.0 * (-0.3) * 0.5, epsilon = 1e-12);
        assert_relative_eq!(approx.dfduu[(0, 0)], 2.0 * 0.25, epsilon = 1e-12);
    }
}
