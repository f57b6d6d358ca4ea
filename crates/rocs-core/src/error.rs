//! Solver error taxonomy

use thiserror::Error;

/// Errors surfaced by the solvers and the problem abstraction.
///
/// Step failures inside the search strategies are recovered locally (shrink
/// the step length, raise the Levenberg-Marquardt multiple) and never reach
/// the caller; everything below aborts the current `run`. A converged-stalled
/// solve is not an error: the solver returns the last accepted iterate.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Invalid settings combination, reported at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Problem assembly failed, e.g. a duplicate term name.
    #[error("construction failed: {0}")]
    Construction(String),

    /// The ODE step budget was exhausted or the state left the finite range.
    #[error("integration failed: {0}")]
    IntegrationFailure(String),

    /// The structured QP back-end returned a non-success status.
    #[error("QP back-end failed: {0}")]
    QpFailure(String),

    /// NaN/Inf detected in a Jacobian or Hessian while numerical-stability
    /// checks are enabled.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),
}
