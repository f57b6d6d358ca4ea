//! Trajectory initialization
//!
//! Where no previous solution or controller is available, the solvers fall
//! back to an initializer that proposes an input and a next state for a
//! shooting interval.

use crate::types::{Scalar, Vector};

/// Zero-input, state-hold initializer.
#[derive(Clone, Debug)]
pub struct DefaultInitializer {
    input_dim: usize,
}

impl DefaultInitializer {
    pub fn new(input_dim: usize) -> Self {
        Self { input_dim }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Proposes `(input, next_state)` for the interval `[time, next_time]`.
    pub fn compute(
        &self,
        _time: Scalar,
        state: &Vector,
        _next_time: Scalar,
    ) -> (Vector, Vector) {
        (Vector::zeros(self.input_dim), state.clone())
    }
}
