//! DDP solver settings

use serde::{Deserialize, Serialize};

use rocs_core::rollout::RolloutSettings;
use rocs_core::types::Scalar;
use rocs_core::SolverError;

/// DDP algorithm variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Sequential linear-quadratic: continuous-time Riccati backward pass
    Slq,
    /// Iterative LQR: discrete-time Riccati backward pass
    Ilqr,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Slq => "SLQ",
            Algorithm::Ilqr => "ILQR",
        }
    }
}

/// Step-acceptance strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategyKind {
    LineSearch,
    LevenbergMarquardt,
}

/// How an indefinite control Hessian is rendered positive definite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HessianCorrectionStrategy {
    /// Lift non-positive `U D U^T` pivots to the floor
    CholeskyModification,
    /// Lift eigenvalues to the floor
    EigenvalueModification,
}

/// Line-search sub-settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LineSearchSettings {
    /// Smallest trial step length
    pub min_step_length: Scalar,
    /// Largest (first) trial step length
    pub max_step_length: Scalar,
    /// Geometric contraction factor between trials, in (0, 1)
    pub contraction_rate: Scalar,
    /// Armijo sufficient-decrease coefficient
    pub armijo_coefficient: Scalar,
    /// Positive-definiteness repair applied before inverting `H_uu`
    pub hessian_correction_strategy: HessianCorrectionStrategy,
    /// Minimum-eigenvalue floor of the repair
    pub hessian_correction_multiple: Scalar,
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            min_step_length: 0.05,
            max_step_length: 1.0,
            contraction_rate: 0.5,
            armijo_coefficient: 1e-4,
            hessian_correction_strategy: HessianCorrectionStrategy::CholeskyModification,
            hessian_correction_multiple: 1e-5,
        }
    }
}

/// Levenberg-Marquardt sub-settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevenbergMarquardtSettings {
    /// Smallest non-zero Riccati multiple
    pub riccati_multiple_default_factor: Scalar,
    /// Geometric expansion/contraction rate of the multiple
    pub riccati_multiple_default_ratio: Scalar,
    /// Smallest actual-over-predicted reduction ratio that accepts a step
    pub min_accepted_ratio: Scalar,
    /// Successive rejections tolerated before the solve is abandoned
    pub max_num_successive_rejections: usize,
}

impl Default for LevenbergMarquardtSettings {
    fn default() -> Self {
        Self {
            riccati_multiple_default_factor: 1e-6,
            riccati_multiple_default_ratio: 2.0,
            min_accepted_ratio: 0.25,
            max_num_successive_rejections: 5,
        }
    }
}

/// Complete DDP settings surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DdpSettings {
    pub algorithm: Algorithm,
    /// Worker threads for the horizon-sharded phases
    pub n_threads: usize,
    /// Outer-iteration cap
    pub max_num_iterations: usize,
    /// Relative cost-change convergence tolerance
    pub min_rel_cost: Scalar,
    /// Equality-constraint ISE convergence tolerance
    pub constraint_tolerance: Scalar,
    /// Initial augmented-Lagrangian penalty coefficient (must exceed 1)
    pub constraint_penalty_initial_value: Scalar,
    /// Penalty growth rate while constraints are violated (must exceed 1)
    pub constraint_penalty_increase_rate: Scalar,
    /// Backward pass on the nominal time grid (single integration step per
    /// interval); `false` sub-steps each interval once more
    pub use_nominal_time_for_backward_pass: bool,
    /// Compute the constraint projections during the (parallel)
    /// approximation phase instead of inside the backward pass
    pub pre_compute_riccati_terms: bool,
    /// Produce a linear feedback policy instead of a feedforward table
    pub use_feedback_policy: bool,
    /// Abort the iteration on NaN/Inf derivatives
    pub check_numerical_stability: bool,
    /// Forward-rollout integration settings (ODE tolerances, step budget)
    pub rollout: RolloutSettings,
    pub strategy: SearchStrategyKind,
    pub line_search: LineSearchSettings,
    pub levenberg_marquardt: LevenbergMarquardtSettings,
    /// Log the per-phase benchmark breakdown when the solver is dropped
    pub display_benchmark: bool,
}

impl Default for DdpSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Slq,
            n_threads: 1,
            max_num_iterations: 15,
            min_rel_cost: 1e-3,
            constraint_tolerance: 1e-3,
            constraint_penalty_initial_value: 2.0,
            constraint_penalty_increase_rate: 2.0,
            use_nominal_time_for_backward_pass: true,
            pre_compute_riccati_terms: true,
            use_feedback_policy: false,
            check_numerical_stability: true,
            rollout: RolloutSettings::default(),
            strategy: SearchStrategyKind::LineSearch,
            line_search: LineSearchSettings::default(),
            levenberg_marquardt: LevenbergMarquardtSettings::default(),
            display_benchmark: false,
        }
    }
}

impl DdpSettings {
    /// Validates settings combinations; called at solver construction.
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.n_threads < 1 {
            return Err(SolverError::Configuration(
                "n_threads must be at least 1".to_string(),
            ));
        }
        if self.max_num_iterations == 0 {
            return Err(SolverError::Configuration(
                "max_num_iterations must be positive".to_string(),
            ));
        }
        if self.line_search.max_step_length < self.line_search.min_step_length {
            return Err(SolverError::Configuration(
                "line-search maximum step length is smaller than the minimum".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.line_search.contraction_rate)
            || self.line_search.contraction_rate == 0.0
        {
            return Err(SolverError::Configuration(
                "line-search contraction rate must lie in (0, 1)".to_string(),
            ));
        }
        if self.constraint_penalty_initial_value <= 1.0
            || self.constraint_penalty_increase_rate <= 1.0
        {
            return Err(SolverError::Configuration(
                "constraint penalty initial value and increase rate must exceed 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert!(DdpSettings::default().validate().is_ok());
    }

    #[test]
    fn invalid_combinations_are_rejected_at_construction_time() {
        let mut s = DdpSettings::default();
        s.n_threads = 0;
        assert!(s.validate().is_err());

        let mut s = DdpSettings::default();
        s.line_search.max_step_length = 0.01;
        s.line_search.min_step_length = 0.1;
        assert!(s.validate().is_err());

        let mut s = DdpSettings::default();
        s.constraint_penalty_initial_value = 0.5;
        assert!(s.validate().is_err());
    }
}
