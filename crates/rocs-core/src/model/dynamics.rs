//! Hybrid system dynamics
//!
//! Continuous flow between events, a jump map applied at event times, and
//! optional guard surfaces. The time-triggered rollout only consults the
//! mode schedule; guard surfaces are carried for state-triggered extensions.

use crate::model::collection::AsAny;
use crate::model::precomputation::PreComputation;
use crate::types::{Matrix, Scalar, Vector, VectorFunctionLinearApproximation};

/// Flow map, jump map and their linearizations.
pub trait SystemDynamics: AsAny + Send {
    /// Continuous dynamics `dx/dt = f(t, x, u)`.
    fn flow_map(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> Vector;

    /// Linearization of the flow map around `(t, x, u)`; the constant term
    /// holds the flow value.
    fn flow_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation;

    /// Discrete transition `x+ = g(t, x)` applied at event times.
    /// Defaults to the identity map.
    fn jump_map(&self, _time: Scalar, state: &Vector, _precomp: &dyn PreComputation) -> Vector {
        state.clone()
    }

    /// Linearization of the jump map; the input block is empty.
    fn jump_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.jump_map(time, state, precomp),
            dfdx: Matrix::identity(state.len(), state.len()),
            dfdu: Matrix::zeros(state.len(), 0),
        }
    }

    /// Guard surfaces whose zero crossings would trigger a jump. Unused by
    /// the time-triggered rollout; defaults to none.
    fn guard_surfaces(&self, _time: Scalar, _state: &Vector) -> Vector {
        Vector::zeros(0)
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics>;
}

impl Clone for Box<dyn SystemDynamics> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Time-invariant linear dynamics `dx/dt = A x + B u`.
#[derive(Clone, Debug)]
pub struct LinearSystemDynamics {
    pub a: Matrix,
    pub b: Matrix,
}

impl LinearSystemDynamics {
    pub fn new(a: Matrix, b: Matrix) -> Self {
        Self { a, b }
    }
}

impl SystemDynamics for LinearSystemDynamics {
    fn flow_map(
        &self,
        _time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> Vector {
        &self.a * state + &self.b * input
    }

    fn flow_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.flow_map(time, state, input, precomp),
            dfdx: self.a.clone(),
            dfdu: self.b.clone(),
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}
