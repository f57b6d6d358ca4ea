//! Pre-computation hook
//!
//! Before evaluating individual terms, the solvers announce which products
//! they are about to request (cost, constraints, dynamics, and whether
//! derivatives are needed). A user hook can compute shared intermediate
//! results once (kinematics, contact data) and cache them; the caches are
//! worker-local because each worker owns its problem clone.

use crate::types::{Scalar, Vector};

bitflags::bitflags! {
    /// Products the caller is about to evaluate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Request: u8 {
        /// Cost values
        const COST = 1 << 0;
        /// Soft-constraint penalty values
        const SOFT_CONSTRAINT = 1 << 1;
        /// Hard constraint values
        const CONSTRAINT = 1 << 2;
        /// Flow/jump map values
        const DYNAMICS = 1 << 3;
        /// First/second derivatives of the requested products
        const APPROXIMATION = 1 << 4;
    }
}

/// User hook requested once per evaluation point.
pub trait PreComputation: Send {
    /// Called before intermediate-time evaluations.
    fn request(&mut self, _request: Request, _time: Scalar, _state: &Vector, _input: &Vector) {}

    /// Called before pre-jump evaluations.
    fn request_pre_jump(&mut self, _request: Request, _time: Scalar, _state: &Vector) {}

    /// Called before final-time evaluations.
    fn request_final(&mut self, _request: Request, _time: Scalar, _state: &Vector) {}

    fn clone_boxed(&self) -> Box<dyn PreComputation>;
}

impl Clone for Box<dyn PreComputation> {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Hook that computes nothing.
#[derive(Clone, Debug, Default)]
pub struct DefaultPreComputation;

impl PreComputation for DefaultPreComputation {
    fn clone_boxed(&self) -> Box<dyn PreComputation> {
        Box::new(self.clone())
    }
}
