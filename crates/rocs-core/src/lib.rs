//! # ROCS Core
//!
//! Shared problem abstraction for the ROCS nonlinear optimal-control solvers.
//!
//! This crate defines everything the DDP and multiple-shooting SQP solvers
//! have in common:
//!
//! - [`types`]: dense scalar/vector/matrix aliases and local function
//!   approximations (linear and quadratic)
//! - [`model`]: the optimal-control problem bundle (dynamics, costs,
//!   constraints, soft-constraint penalties, pre-computation hook)
//! - [`reference`]: target trajectories and the hybrid mode schedule
//! - [`rollout`]: adaptive integration of the hybrid closed-loop system
//! - [`controller`]: feedforward and linear state-feedback policies
//! - [`performance`]: the per-solve performance index
//! - [`solution`]: the primal solution returned by the solvers
//! - [`threading`]: the fixed-size worker pool and per-worker problem clones

pub mod benchmark;
pub mod controller;
pub mod error;
pub mod initialization;
pub mod linalg;
pub mod misc;
pub mod model;
pub mod performance;
pub mod reference;
pub mod rollout;
pub mod solution;
pub mod threading;
pub mod types;

// Common re-exports
pub use controller::{Controller, FeedforwardController, LinearController};
pub use error::SolverError;
pub use initialization::DefaultInitializer;
pub use model::OptimalControlProblem;
pub use performance::PerformanceIndex;
pub use reference::{ModeSchedule, ReferenceManager, TargetTrajectories};
pub use rollout::{RolloutOutput, RolloutSettings, TimeTriggeredRollout};
pub use solution::PrimalSolution;
pub use types::{
    Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector,
    VectorFunctionLinearApproximation, VectorFunctionQuadraticApproximation,
};
