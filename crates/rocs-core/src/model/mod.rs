//! Optimal-control problem abstraction
//!
//! A problem bundle owns polymorphic term collections (costs, constraints),
//! the hybrid dynamics, a soft-constraint penalty and a pre-computation
//! hook. Cloning a bundle deep-clones every term, which is how each solver
//! worker gets its own independent copy.

pub mod collection;
pub mod constraint;
pub mod cost;
pub mod dynamics;
pub mod penalty;
pub mod precomputation;
pub mod problem;

pub use collection::TermCollection;
pub use constraint::{LinearStateInputConstraint, StateConstraint, StateInputConstraint};
pub use cost::{QuadraticStateCost, QuadraticStateInputCost, StateCost, StateInputCost};
pub use dynamics::{LinearSystemDynamics, SystemDynamics};
pub use penalty::{PenaltyFunction, QuadraticPenalty, RelaxedBarrierPenalty, SoftConstraintPenalty};
pub use precomputation::{DefaultPreComputation, PreComputation, Request};
pub use problem::OptimalControlProblem;
