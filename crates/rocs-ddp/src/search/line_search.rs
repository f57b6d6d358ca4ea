//! Merit-function line search

use log::debug;

use rocs_core::performance::PerformanceIndex;
use rocs_core::types::Scalar;
use rocs_core::{misc, SolverError};

use crate::search::{relative_cost_change, Nominal, SearchContext, StepOutcome};
use crate::settings::{DdpSettings, LineSearchSettings};

/// Backtracking line search with an Armijo acceptance rule.
///
/// Trial step lengths contract geometrically from the maximum; the first
/// accepted trial is therefore the largest accepted step. A trial is
/// accepted when the constraint-augmented merit improves by at least the
/// Armijo fraction of the predicted descent, measured with the integral of
/// the squared feedforward increments.
pub struct LineSearchStrategy {
    settings: LineSearchSettings,
    min_rel_cost: Scalar,
    constraint_tolerance: Scalar,
    step_length_star: Scalar,
}

impl LineSearchStrategy {
    pub fn new(settings: &DdpSettings) -> Self {
        Self {
            settings: settings.line_search.clone(),
            min_rel_cost: settings.min_rel_cost,
            constraint_tolerance: settings.constraint_tolerance,
            step_length_star: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.step_length_star = 0.0;
    }

    pub fn step_length(&self) -> Scalar {
        self.step_length_star
    }

    pub fn run(
        &mut self,
        ctx: &SearchContext<'_>,
        _expected_cost: Scalar,
        nominal: &mut Nominal,
    ) -> Result<StepOutcome, SolverError> {
        let base_controller = nominal.controller.clone();
        let update_is = base_controller.update_integral_squared();

        // Step-length-zero rollout: re-tracks the nominal under the new
        // gains and anchors the Armijo comparison.
        let (baseline_rollout, baseline_performance) = ctx
            .rollout_and_evaluate(&base_controller, 0)
            .map_err(|e| {
                SolverError::IntegrationFailure(format!(
                    "controller does not generate a stable rollout: {e}"
                ))
            })?;
        let baseline_merit = ctx.penalty_coefficients.acceptance_merit(&baseline_performance);

        nominal.rollout = baseline_rollout;
        nominal.performance = baseline_performance;
        self.step_length_star = 0.0;

        let mut alpha = self.settings.max_step_length;
        while misc::almost_ge(alpha, self.settings.min_step_length) {
            let mut controller = base_controller.clone();
            controller.step(alpha);

            match ctx.rollout_and_evaluate(&controller, 0) {
                Ok((rollout, performance)) => {
                    let merit = ctx.penalty_coefficients.acceptance_merit(&performance);
                    let armijo_bound = baseline_merit
                        - self.settings.armijo_coefficient * alpha * update_is;
                    debug!(
                        "line search: step {alpha:.4} merit {merit:.6e} (bound {armijo_bound:.6e})"
                    );
                    if merit < armijo_bound {
                        self.step_length_star = alpha;
                        nominal.controller = controller;
                        nominal.rollout = rollout;
                        nominal.performance = performance;
                        break;
                    }
                }
                Err(e) => {
                    debug!("line search: step {alpha:.4} aborted: {e}");
                }
            }
            alpha *= self.settings.contraction_rate;
        }

        if self.step_length_star == 0.0 {
            debug!("line search: no accepted step, keeping the step-zero rollout");
        }
        nominal.controller.clear_delta_bias();
        Ok(StepOutcome::Accepted)
    }

    /// Converged when the cost change or the step length vanished while the
    /// state-input equality constraints are satisfied. An unreliable
    /// controller increment (truncated warm start, rejected line search)
    /// suppresses the step-length criterion.
    pub fn check_convergence(
        &self,
        unreliable_increment: bool,
        previous: &PerformanceIndex,
        current: &PerformanceIndex,
    ) -> (bool, String) {
        let rel_cost = relative_cost_change(previous, current);
        let step_vanished = self.step_length_star <= 0.0 && !unreliable_increment;
        let cost_converged = rel_cost <= self.min_rel_cost;
        let constraints_ok =
            current.state_input_eq_constraint_ise <= self.constraint_tolerance;
        let converged = (cost_converged || step_vanished) && constraints_ok;

        let mut info = String::new();
        if converged {
            if step_vanished {
                info.push_str("the step length reduced to zero; ");
            }
            if cost_converged {
                info.push_str(&format!(
                    "the relative cost change {rel_cost:.3e} is below {:.3e}; ",
                    self.min_rel_cost
                ));
            }
            info.push_str(&format!(
                "state-input equality ISE {:.3e} is below {:.3e}",
                current.state_input_eq_constraint_ise, self.constraint_tolerance
            ));
        }
        (converged, info)
    }
}
