//! Problem fixtures shared by the solver test suites.
//!
//! - [`two_mode`]: a two-mode switched linear system with a quadratic
//!   tracking cost, the classic smoke test of the DDP family
//! - [`circular`]: planar kinematic point constrained to a circle through a
//!   state-input equality constraint

pub mod circular;
pub mod two_mode;
