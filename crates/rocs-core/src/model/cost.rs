//! Cost term capabilities and reference quadratic terms

use crate::model::collection::{AsAny, TermCollection};
use crate::model::precomputation::PreComputation;
use crate::reference::TargetTrajectories;
use crate::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector};

/// Running cost term `L(t, x, u)`.
pub trait StateInputCost: AsAny + Send {
    fn value(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        targets: &TargetTrajectories,
        precomp: &dyn PreComputation,
    ) -> Scalar;

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        targets: &TargetTrajectories,
        precomp: &dyn PreComputation,
    ) -> ScalarFunctionQuadraticApproximation;

    fn clone_boxed(&self) -> Box<dyn StateInputCost>;
}

impl Clone for Box<dyn StateInputCost> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// State-only cost term (terminal and pre-jump costs).
pub trait StateCost: AsAny + Send {
    fn value(
        &self,
        time: Scalar,
        state: &Vector,
        targets: &TargetTrajectories,
        precomp: &dyn PreComputation,
    ) -> Scalar;

    /// Quadratic approximation with an empty input block.
    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        targets: &TargetTrajectories,
        precomp: &dyn PreComputation,
    ) -> ScalarFunctionQuadraticApproximation;

    fn clone_boxed(&self) -> Box<dyn StateCost>;
}

impl Clone for Box<dyn StateCost> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Quadratic tracking cost
/// `L = 1/2 (x - x_ref)' Q (x - x_ref) + 1/2 (u - u_ref)' R (u - u_ref)`
/// with references interpolated from the target trajectories.
#[derive(Clone, Debug)]
pub struct QuadraticStateInputCost {
    pub q: Matrix,
    pub r: Matrix,
}

impl QuadraticStateInputCost {
    pub fn new(q: Matrix, r: Matrix) -> Self {
        Self { q, r }
    }

    fn deviations(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        targets: &TargetTrajectories,
    ) -> (Vector, Vector) {
        (state - targets.desired_state(time), input - targets.desired_input(time))
    }
}

impl StateInputCost for QuadraticStateInputCost {
    fn value(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> Scalar {
        let (dx, du) = self.deviations(time, state, input, targets);
        0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * du.dot(&(&self.r * &du))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> ScalarFunctionQuadraticApproximation {
        let (dx, du) = self.deviations(time, state, input, targets);
        let q_dx = &self.q * &dx;
        let r_du = &self.r * &du;
        let mut approx = ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
        approx.f = 0.5 * dx.dot(&q_dx) + 0.5 * du.dot(&r_du);
        approx.dfdx = q_dx;
        approx.dfdu = r_du;
        approx.dfdxx = self.q.clone();
        approx.dfduu = self.r.clone();
        approx
    }

    fn clone_boxed(&self) -> Box<dyn StateInputCost> {
        Box::new(self.clone())
    }
}

/// Quadratic state-only cost `Phi = 1/2 (x - x_ref)' Q (x - x_ref)`.
#[derive(Clone, Debug)]
pub struct QuadraticStateCost {
    pub q: Matrix,
}

impl QuadraticStateCost {
    pub fn new(q: Matrix) -> Self {
        Self { q }
    }
}

impl StateCost for QuadraticStateCost {
    fn value(
        &self,
        time: Scalar,
        state: &Vector,
        targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> Scalar {
        let dx = state - targets.desired_state(time);
        0.5 * dx.dot(&(&self.q * &dx))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        targets: &TargetTrajectories,
        _precomp: &dyn PreComputation,
    ) -> ScalarFunctionQuadraticApproximation {
        let dx = state - targets.desired_state(time);
        let q_dx = &self.q * &dx;
        let mut approx = ScalarFunctionQuadraticApproximation::zero(state.len(), 0);
        approx.f = 0.5 * dx.dot(&q_dx);
        approx.dfdx = q_dx;
        approx.dfdxx = self.q.clone();
        approx
    }

    fn clone_boxed(&self) -> Box<dyn StateCost> {
        Box::new(self.clone())
    }
}

/// Summed value of a state-input cost collection.
pub fn collection_value(
    collection: &TermCollection<dyn StateInputCost>,
    time: Scalar,
    state: &Vector,
    input: &Vector,
    targets: &TargetTrajectories,
    precomp: &dyn PreComputation,
) -> Scalar {
    collection
        .iter()
        .map(|c| c.value(time, state, input, targets, precomp))
        .sum()
}

/// Summed quadratic approximation of a state-input cost collection.
pub fn collection_quadratic_approximation(
    collection: &TermCollection<dyn StateInputCost>,
    time: Scalar,
    state: &Vector,
    input: &Vector,
    targets: &TargetTrajectories,
    precomp: &dyn PreComputation,
) -> ScalarFunctionQuadraticApproximation {
    let mut total = ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
    for term in collection.iter() {
        total += &term.quadratic_approximation(time, state, input, targets, precomp);
    }
    total
}

/// Summed value of a state-only cost collection.
pub fn state_collection_value(
    collection: &TermCollection<dyn StateCost>,
    time: Scalar,
    state: &Vector,
    targets: &TargetTrajectories,
    precomp: &dyn PreComputation,
) -> Scalar {
    collection
        .iter()
        .map(|c| c.value(time, state, targets, precomp))
        .sum()
}

/// Summed quadratic approximation of a state-only cost collection.
pub fn state_collection_quadratic_approximation(
    collection: &TermCollection<dyn StateCost>,
    time: Scalar,
    state: &Vector,
    targets: &TargetTrajectories,
    precomp: &dyn PreComputation,
) -> ScalarFunctionQuadraticApproximation {
    let mut total = ScalarFunctionQuadraticApproximation::zero(state.len(), 0);
    for term in collection.iter() {
        total += &term.quadratic_approximation(time, state, targets, precomp);
    }
    total
}
