//! Two-mode switched linear system
//!
//! Mode 0 and mode 1 are both unstable linear systems; a single time event
//! switches between them. The cost tracks the set point `(4, 2)` with input
//! regularization and a quadratic terminal cost. With the event at
//! `t = 0.1897` on the horizon `[0, 2]` from `x_0 = (0, 2)`, the optimal
//! total cost is 9.766.

use rocs_core::model::{QuadraticStateCost, QuadraticStateInputCost, SystemDynamics};
use rocs_core::model::precomputation::PreComputation;
use rocs_core::reference::{ModeSchedule, ReferenceManager, TargetTrajectories};
use rocs_core::types::{Matrix, Scalar, Vector, VectorFunctionLinearApproximation};
use rocs_core::OptimalControlProblem;

pub const STATE_DIM: usize = 2;
pub const INPUT_DIM: usize = 1;

/// Per-mode linear flow `dx/dt = A_m x + B_m u`.
#[derive(Clone, Debug)]
pub struct SwitchedLinearSystem {
    mode_schedule: ModeSchedule,
}

impl SwitchedLinearSystem {
    pub fn new(mode_schedule: ModeSchedule) -> Self {
        Self { mode_schedule }
    }

    fn system_matrices(&self, time: Scalar) -> (Matrix, Matrix) {
        match self.mode_schedule.mode_at_time(time) {
            0 => (
                Matrix::from_row_slice(2, 2, &[0.6, 1.2, -0.8, 3.4]),
                Matrix::from_row_slice(2, 1, &[1.0, 1.0]),
            ),
            _ => (
                Matrix::from_row_slice(2, 2, &[4.0, 3.0, -1.0, 0.0]),
                Matrix::from_row_slice(2, 1, &[2.0, -1.0]),
            ),
        }
    }
}

impl SystemDynamics for SwitchedLinearSystem {
    fn flow_map(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> Vector {
        let (a, b) = self.system_matrices(time);
        a * state + b * input
    }

    fn flow_map_linear_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        _precomp: &dyn PreComputation,
    ) -> VectorFunctionLinearApproximation {
        let (a, b) = self.system_matrices(time);
        VectorFunctionLinearApproximation {
            f: &a * state + &b * input,
            dfdx: a,
            dfdu: b,
        }
    }

    fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
        Box::new(self.clone())
    }
}

/// Reference manager with the switch at `event_time` and the `(4, 2)` set
/// point.
pub fn reference_manager(event_time: Scalar) -> ReferenceManager {
    let mode_schedule =
        ModeSchedule::new(vec![event_time], vec![0, 1]).expect("two-mode schedule");
    let targets = TargetTrajectories::set_point(
        Vector::from_vec(vec![4.0, 2.0]),
        Vector::zeros(INPUT_DIM),
    );
    ReferenceManager::new(mode_schedule, targets)
}

/// Problem bundle of the switched tracking task.
pub fn problem(reference: &ReferenceManager) -> OptimalControlProblem {
    let dynamics = SwitchedLinearSystem::new(reference.mode_schedule().clone());
    let mut problem = OptimalControlProblem::new(Box::new(dynamics));

    problem
        .cost
        .add(
            "cost",
            Box::new(QuadraticStateInputCost::new(
                Matrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 1.0]),
                Matrix::from_row_slice(1, 1, &[1.0]),
            )),
        )
        .expect("running cost");
    problem
        .final_cost
        .add(
            "finalCost",
            Box::new(QuadraticStateCost::new(Matrix::identity(2, 2))),
        )
        .expect("terminal cost");

    problem.target_trajectories = reference.target_trajectories().clone();
    problem
}
