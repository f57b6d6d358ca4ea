//! Circular kinematics tracking problem
//!
//! A planar kinematic point (`dx/dt = u`) is asked to travel the unit
//! circle at unit angular rate. The running cost penalizes the deviation of
//! the swept rate `x_0 u_1 - x_1 u_0` from one plus a small input
//! regularization; the state-input equality constraint `x . u = 0` pins the
//! motion to the circle. Starting on `(1, 0)`, the optimum costs well below
//! 0.1 over a ten-second horizon.

use rocs_core::model::precomputation::PreComputation;
use rocs_core::model::{StateInputConstraint, StateInputCost, SystemDynamics};
use rocs_core::reference::TargetTrajectories;
use rocs_core::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector,
                       VectorFunctionLinearApproximation};
use rocs_core::OptimalControlProblem;

pub const STATE_DIM: usize = 2;
pub const INPUT_DIM: usize = 2;

const INPUT_WEIGHT: Scalar = 0.005;

/// Kinematic point: the input is the velocity.
#[derive(Clone, Debug)]
pub struct CircularKinematicsSystem;

impl SystemDynamics for CircularKinematicsSystem {
    fn flow_map(
        &self,
        _time: Scalar,
        _state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> Vector {
        input.clone()
    }

    fn flow_map_linear_approximation(
        &self,
        _time: Scalar,
        _state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: input.clone(),
            dfdx: Matrix::zeros(2, 2),
            dfdu: Matrix::identity(2, 2),
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}

/// `L = 1/2 (x_0 u_1 - x_1 u_0 - 1)^2 + 0.005 |u|^2`, with hand-derived
/// exact derivatives.
#[derive(Clone, Debug)]
pub struct CircularKinematicsCost;

impl CircularKinematicsCost {
    fn rate_error(state: &Vector, input: &Vector) -> Scalar {
        state[0] * input[1] - state[1] * input[0] - 1.0
    }
}

impl StateInputCost for CircularKinematicsCost {
    fn value(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> Scalar {
        let e = Self::rate_error(state, input);
        0.5 * e * e + INPUT_WEIGHT * input.norm_squared()
    }

    fn quadratic_approximation(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> ScalarFunctionQuadraticApproximation {
        let e = Self::rate_error(state, input);
        let gx = Vector::from_vec(vec![input[1], -input[0]]);
        let gu = Vector::from_vec(vec![-state[1], state[0]]);

        let mut approx = ScalarFunctionQuadraticApproximation::zero(2, 2);
        approx.f = 0.5 * e * e + INPUT_WEIGHT * input.norm_squared();
        approx.dfdx = &gx * e;
        approx.dfdu = &gu * e + input * (2.0 * INPUT_WEIGHT);
        approx.dfdxx = &gx * gx.transpose();
        approx.dfduu = &gu * gu.transpose() + Matrix::identity(2, 2) * (2.0 * INPUT_WEIGHT);
        // d^2 e / du dx is the rotation generator.
        approx.dfdux = &gu * gx.transpose()
            + Matrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]) * e;
        approx
    }

    fn clone_boxed(&self) -> Box<dyn StateInputCost> {
        Box::new(self.clone())
    }
}

/// Radial velocity must vanish: `x . u = 0`.
#[derive(Clone, Debug)]
pub struct RadialVelocityConstraint;

impl StateInputConstraint for RadialVelocityConstraint {
    fn num_constraints(&self, _time: Scalar) -> usize {
        1
    }

    fn value(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> Vector {
        Vector::from_vec(vec![state.dot(input)])
    }

    fn linear_approximation(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: Vector::from_vec(vec![state.dot(input)]),
            dfdx: Matrix::from_row_slice(1, 2, &[input[0], input[1]]),
            dfdu: Matrix::from_row_slice(1, 2, &[state[0], state[1]]),
        }
    }

    fn clone_boxed(&self) -> Box<dyn StateInputConstraint> {
        Box::new(self.clone())
    }
}

/// Problem bundle of the constrained circle-tracking task.
pub fn problem() -> OptimalControlProblem {
    let mut problem = OptimalControlProblem::new(Box::new(CircularKinematicsSystem));
    problem
        .cost
        .add("cost", Box::new(CircularKinematicsCost))
        .expect("running cost");
    problem
        .equality_constraints
        .add("radialVelocity", Box::new(RadialVelocityConstraint))
        .expect("equality constraint");
    problem
}
