//! Levenberg-Marquardt step acceptance

use log::{debug, warn};

use rocs_core::performance::PerformanceIndex;
use rocs_core::types::Scalar;
use rocs_core::{misc, SolverError};

use crate::search::{relative_cost_change, Nominal, SearchContext, StepOutcome};
use crate::settings::{DdpSettings, LevenbergMarquardtSettings};

/// Full-step strategy with an adaptive Tikhonov multiple.
///
/// After each trial step the ratio of actual over predicted merit reduction
/// drives the Riccati multiple: a poor ratio raises it (bounded geometric
/// growth), a good ratio lowers it (down to zero). The multiple feeds the
/// next backward pass as a `mu I` term on the Hamiltonian Hessian and the
/// Riccati state term.
pub struct LevenbergMarquardtStrategy {
    settings: LevenbergMarquardtSettings,
    min_rel_cost: Scalar,
    constraint_tolerance: Scalar,
    riccati_multiple: Scalar,
    adaptive_ratio: Scalar,
    num_successive_rejections: usize,
}

impl LevenbergMarquardtStrategy {
    pub fn new(settings: &DdpSettings) -> Self {
        Self {
            settings: settings.levenberg_marquardt.clone(),
            min_rel_cost: settings.min_rel_cost,
            constraint_tolerance: settings.constraint_tolerance,
            riccati_multiple: 0.0,
            adaptive_ratio: 1.0,
            num_successive_rejections: 0,
        }
    }

    pub fn reset(&mut self) {
        self.riccati_multiple = 0.0;
        self.adaptive_ratio = 1.0;
        self.num_successive_rejections = 0;
    }

    pub fn riccati_multiple(&self) -> Scalar {
        self.riccati_multiple
    }

    pub fn run(
        &mut self,
        ctx: &SearchContext<'_>,
        expected_cost: Scalar,
        nominal: &mut Nominal,
    ) -> Result<StepOutcome, SolverError> {
        let previous_merit = ctx.penalty_coefficients.acceptance_merit(&nominal.performance);
        let predicted_reduction = previous_merit - expected_cost;

        // A vanishing prediction means the increment carries no new
        // information; re-track the nominal instead of stepping.
        let step_length = if misc::almost_eq(predicted_reduction, 0.0) {
            0.0
        } else {
            1.0
        };

        let mut controller = nominal.controller.clone();
        controller.step(step_length);

        let trial = ctx.rollout_and_evaluate(&controller, 0);
        let (trial_merit, trial_result) = match trial {
            Ok((rollout, performance)) => (
                ctx.penalty_coefficients.acceptance_merit(&performance),
                Some((rollout, performance)),
            ),
            Err(e) => {
                debug!("trial step diverged: {e}");
                (Scalar::INFINITY, None)
            }
        };

        let actual_reduction = previous_merit - trial_merit;
        let ratio = if actual_reduction.abs() < self.min_rel_cost
            || predicted_reduction <= self.min_rel_cost
        {
            1.0
        } else if actual_reduction < 0.0 {
            0.0
        } else {
            actual_reduction / predicted_reduction
        };
        debug!(
            "actual reduction {actual_reduction:.6e}, predicted {predicted_reduction:.6e}, \
             ratio {ratio:.3}"
        );

        self.adapt_multiple(ratio);

        if self.num_successive_rejections > self.settings.max_num_successive_rejections {
            warn!(
                "abandoning the step after {} successive rejections",
                self.num_successive_rejections
            );
            return Ok(StepOutcome::Abandoned);
        }

        if ratio >= self.settings.min_accepted_ratio {
            self.num_successive_rejections = 0;
            if let Some((rollout, performance)) = trial_result {
                nominal.controller = controller;
                nominal.rollout = rollout;
                nominal.performance = performance;
            }
            nominal.controller.clear_delta_bias();
            Ok(StepOutcome::Accepted)
        } else {
            self.num_successive_rejections += 1;
            debug!(
                "step rejected with ratio {ratio:.3} ({} of {})",
                self.num_successive_rejections, self.settings.max_num_successive_rejections
            );
            Ok(StepOutcome::Rejected)
        }
    }

    /// Trust-region-style multiple adaptation.
    fn adapt_multiple(&mut self, ratio: Scalar) {
        let floor = self.settings.riccati_multiple_default_factor;
        if ratio < 0.25 {
            self.adaptive_ratio =
                self.adaptive_ratio.max(1.0) * self.settings.riccati_multiple_default_ratio;
            self.riccati_multiple = (self.adaptive_ratio * self.riccati_multiple).max(floor);
        } else if ratio > 0.75 {
            self.adaptive_ratio =
                self.adaptive_ratio.min(1.0) / self.settings.riccati_multiple_default_ratio;
            let candidate = self.adaptive_ratio * self.riccati_multiple;
            self.riccati_multiple = if candidate > floor { candidate } else { 0.0 };
        } else {
            self.adaptive_ratio = 1.0;
        }
    }

    /// Converged when the merit change vanished on an accepted step and the
    /// state-input equality constraints are satisfied.
    pub fn check_convergence(
        &self,
        unreliable_increment: bool,
        previous: &PerformanceIndex,
        current: &PerformanceIndex,
    ) -> (bool, String) {
        let rel_cost = relative_cost_change(previous, current);
        let cost_converged = self.num_successive_rejections == 0
            && !unreliable_increment
            && rel_cost <= self.min_rel_cost;
        let constraints_ok =
            current.state_input_eq_constraint_ise <= self.constraint_tolerance;
        let converged = cost_converged && constraints_ok;

        let info = if converged {
            format!(
                "the relative cost change {rel_cost:.3e} is below {:.3e} and the state-input \
                 equality ISE {:.3e} is below {:.3e}",
                self.min_rel_cost,
                current.state_input_eq_constraint_ise,
                self.constraint_tolerance
            )
        } else {
            String::new()
        };
        (converged, info)
    }
}
