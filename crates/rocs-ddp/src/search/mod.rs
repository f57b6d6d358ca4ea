//! Step-acceptance strategies
//!
//! After a backward pass has produced a candidate policy update, a search
//! strategy decides how much of it to apply: the line search backtracks
//! over step lengths against a merit function, the Levenberg-Marquardt
//! scheme takes full steps and adapts a Tikhonov multiple from the
//! actual-versus-predicted reduction ratio.

pub mod levenberg_marquardt;
pub mod line_search;

use rocs_core::controller::{Controller, LinearController};
use rocs_core::performance::PerformanceIndex;
use rocs_core::reference::ModeSchedule;
use rocs_core::rollout::{RolloutOutput, TimeTriggeredRollout};
use rocs_core::threading::WorkerProblems;
use rocs_core::types::{Scalar, Vector};
use rocs_core::SolverError;

use crate::model_data::evaluate_rollout_performance;
use crate::settings::DdpSettings;

pub use levenberg_marquardt::LevenbergMarquardtStrategy;
pub use line_search::LineSearchStrategy;

/// Outcome of one strategy step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The candidate (or a damped version of it) was taken.
    Accepted,
    /// The candidate was rejected; the caller restores the previous nominal.
    Rejected,
    /// Too many successive rejections; the solve keeps the last accepted
    /// iterate and stops.
    Abandoned,
}

/// Adaptive penalty coefficients of the constraint-augmented merit.
#[derive(Clone, Copy, Debug)]
pub struct ConstraintPenaltyCoefficients {
    pub state_eq_coeff: Scalar,
    pub state_input_eq_coeff: Scalar,
    pub state_input_eq_tolerance: Scalar,
}

impl ConstraintPenaltyCoefficients {
    pub fn new(settings: &DdpSettings) -> Self {
        Self {
            state_eq_coeff: settings.constraint_penalty_initial_value,
            state_input_eq_coeff: settings.constraint_penalty_initial_value,
            state_input_eq_tolerance: settings
                .constraint_penalty_initial_value
                .powf(-0.1),
        }
    }

    /// Grows the coefficients while the measured violations sit above their
    /// tolerances.
    pub fn update(&mut self, performance: &PerformanceIndex, settings: &DdpSettings) {
        if performance.state_eq_constraint_ise > settings.constraint_tolerance {
            self.state_eq_coeff *= settings.constraint_penalty_increase_rate;
        }

        if performance.state_input_eq_constraint_ise < self.state_input_eq_tolerance {
            self.state_input_eq_tolerance /= self.state_input_eq_coeff.powf(0.9);
        } else {
            self.state_input_eq_coeff *= settings.constraint_penalty_increase_rate;
            self.state_input_eq_tolerance /= self.state_input_eq_coeff.powf(0.1);
        }
        self.state_input_eq_tolerance = self
            .state_input_eq_tolerance
            .max(settings.constraint_tolerance);
    }

    /// Constraint-augmented merit used for step acceptance. The performance
    /// index itself keeps `merit = cost + inequality penalty`; the
    /// augmentation lives only in the acceptance decision.
    pub fn acceptance_merit(&self, performance: &PerformanceIndex) -> Scalar {
        performance.total_cost
            + self.state_eq_coeff * performance.state_eq_constraint_ise
            + self.state_input_eq_coeff
                * performance.state_input_eq_constraint_ise.max(0.0).sqrt()
            + performance.inequality_constraint_penalty
    }
}

/// Current accepted iterate.
#[derive(Clone, Debug, Default)]
pub struct Nominal {
    pub controller: LinearController,
    pub rollout: RolloutOutput,
    pub performance: PerformanceIndex,
}

/// Borrowed solver state handed to a strategy for one step.
pub struct SearchContext<'a> {
    pub rollout: &'a TimeTriggeredRollout,
    pub problems: &'a WorkerProblems,
    pub mode_schedule: &'a ModeSchedule,
    pub init_time: Scalar,
    pub init_state: &'a Vector,
    pub final_time: Scalar,
    pub penalty_coefficients: &'a ConstraintPenaltyCoefficients,
}

impl SearchContext<'_> {
    /// Closed-loop rollout of `controller` followed by cost/constraint
    /// accounting, on the given worker's problem clone.
    pub fn rollout_and_evaluate(
        &self,
        controller: &LinearController,
        worker_id: usize,
    ) -> Result<(RolloutOutput, PerformanceIndex), SolverError> {
        let policy = Controller::LinearFeedback(controller.clone());
        let mut problem = self.problems.lock(worker_id);
        let output = self.rollout.run(
            problem.dynamics.as_ref(),
            problem.pre_computation.as_ref(),
            self.init_time,
            self.init_state,
            self.final_time,
            &policy,
            self.mode_schedule,
        )?;
        let performance = evaluate_rollout_performance(&mut problem, &output)?;
        Ok((output, performance))
    }
}

/// Tagged strategy variant owned by the solver.
pub enum SearchStrategy {
    LineSearch(LineSearchStrategy),
    LevenbergMarquardt(LevenbergMarquardtStrategy),
}

impl SearchStrategy {
    pub fn reset(&mut self) {
        match self {
            SearchStrategy::LineSearch(s) => s.reset(),
            SearchStrategy::LevenbergMarquardt(s) => s.reset(),
        }
    }

    /// Tikhonov multiple for the next backward pass (zero under line
    /// search).
    pub fn riccati_multiple(&self) -> Scalar {
        match self {
            SearchStrategy::LineSearch(_) => 0.0,
            SearchStrategy::LevenbergMarquardt(s) => s.riccati_multiple(),
        }
    }

    pub fn run(
        &mut self,
        ctx: &SearchContext<'_>,
        expected_cost: Scalar,
        nominal: &mut Nominal,
    ) -> Result<StepOutcome, SolverError> {
        match self {
            SearchStrategy::LineSearch(s) => s.run(ctx, expected_cost, nominal),
            SearchStrategy::LevenbergMarquardt(s) => s.run(ctx, expected_cost, nominal),
        }
    }

    /// Convergence decision on two successive accepted iterates.
    pub fn check_convergence(
        &self,
        unreliable_increment: bool,
        previous: &PerformanceIndex,
        current: &PerformanceIndex,
    ) -> (bool, String) {
        match self {
            SearchStrategy::LineSearch(s) => {
                s.check_convergence(unreliable_increment, previous, current)
            }
            SearchStrategy::LevenbergMarquardt(s) => {
                s.check_convergence(unreliable_increment, previous, current)
            }
        }
    }
}

pub(crate) fn relative_cost_change(
    previous: &PerformanceIndex,
    current: &PerformanceIndex,
) -> Scalar {
    (current.total_cost + current.inequality_constraint_penalty
        - previous.total_cost
        - previous.inequality_constraint_penalty)
        .abs()
}
