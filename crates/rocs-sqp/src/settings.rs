//! SQP solver settings

use serde::{Deserialize, Serialize};

use rocs_core::types::Scalar;
use rocs_core::SolverError;

/// Sensitivity-aware discretization scheme of the shooting intervals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegratorType {
    Euler,
    Rk2,
    Rk4,
}

/// Knobs of the structured QP back-end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QpSettings {
    /// Floor applied to the stage control Hessian before factorization
    pub min_eigenvalue_floor: Scalar,
    /// Penalty weight folding non-projected equality constraints into the
    /// stage cost
    pub equality_penalty: Scalar,
}

impl Default for QpSettings {
    fn default() -> Self {
        Self {
            min_eigenvalue_floor: 1e-9,
            equality_penalty: 1e4,
        }
    }
}

/// Complete SQP settings surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SqpSettings {
    /// Worker threads for the horizon-sharded phases
    pub n_threads: usize,
    /// Outer-iteration cap
    pub sqp_iteration: usize,
    /// Nominal shooting interval
    pub dt: Scalar,
    pub integrator_type: IntegratorType,
    /// Eliminate the state-input equality constraints by null-space
    /// projection before the QP (silently disabled when the problem has no
    /// such constraints)
    pub project_state_input_equality_constraints: bool,
    /// Line-search contraction factor
    pub alpha_decay: Scalar,
    /// Smallest line-search step
    pub alpha_min: Scalar,
    /// Filter margin on the constraint violation
    pub gamma_c: Scalar,
    /// Violation level above which any step is rejected
    pub g_max: Scalar,
    /// Violation level considered feasible
    pub g_min: Scalar,
    /// Merit-improvement convergence tolerance
    pub cost_tol: Scalar,
    /// Armijo sufficient-decrease factor
    pub armijo_factor: Scalar,
    /// Step-magnitude convergence tolerance
    pub delta_tol: Scalar,
    /// Produce a linear feedback policy instead of a feedforward table
    pub use_feedback_policy: bool,
    pub print_solver_status: bool,
    pub print_linesearch: bool,
    /// Log the per-phase benchmark breakdown when the solver is dropped
    pub print_solver_statistics: bool,
    /// Opaque pass-through to the QP back-end
    pub qp_settings: QpSettings,
}

impl Default for SqpSettings {
    fn default() -> Self {
        Self {
            n_threads: 1,
            sqp_iteration: 10,
            dt: 0.01,
            integrator_type: IntegratorType::Rk2,
            project_state_input_equality_constraints: true,
            alpha_decay: 0.5,
            alpha_min: 1e-4,
            gamma_c: 1e-6,
            g_max: 1e6,
            g_min: 1e-6,
            cost_tol: 1e-4,
            armijo_factor: 1e-4,
            delta_tol: 1e-6,
            use_feedback_policy: false,
            print_solver_status: false,
            print_linesearch: false,
            print_solver_statistics: false,
            qp_settings: QpSettings::default(),
        }
    }
}

impl SqpSettings {
    /// Validates settings combinations; called at solver construction.
    pub fn validate(&self) -> Result<(), SolverError> {
        if self.n_threads < 1 {
            return Err(SolverError::Configuration(
                "n_threads must be at least 1".to_string(),
            ));
        }
        if self.sqp_iteration == 0 {
            return Err(SolverError::Configuration(
                "sqp_iteration must be positive".to_string(),
            ));
        }
        if self.dt <= 0.0 {
            return Err(SolverError::Configuration(
                "dt must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.alpha_decay) || self.alpha_decay == 0.0 {
            return Err(SolverError::Configuration(
                "alpha_decay must lie in (0, 1)".to_string(),
            ));
        }
        if self.g_min >= self.g_max {
            return Err(SolverError::Configuration(
                "g_min must be smaller than g_max".to_string(),
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
        assert!(SqpSettings::default().validate().is_ok());
    }

    #[test]
    fn bad_discretization_is_rejected() {
        let mut s = SqpSettings::default();
        s.dt = 0.0;
        assert!(s.validate().is_err());
    }
}
