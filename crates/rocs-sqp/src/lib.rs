//! # ROCS SQP
//!
//! Direct multiple-shooting sequential quadratic programming over the
//! shared problem abstraction of `rocs-core`:
//!
//! - [`time_discretization`]: annotated time grid with event-node pairs
//! - [`transcription`]: per-interval sensitivity discretization, cost
//!   quadratics and constraint projection, sharded across the worker pool
//! - [`qp_solver`]: structured staircase QP back-end with Riccati feedback
//! - [`solver`]: the outer filter-line-search loop

pub mod qp_solver;
pub mod settings;
pub mod solver;
pub mod time_discretization;
pub mod transcription;

pub use qp_solver::{QpStatus, StructuredQpSolver};
pub use settings::{IntegratorType, SqpSettings};
pub use solver::SqpSolver;
pub use time_discretization::{AnnotatedTime, TimeTag};
