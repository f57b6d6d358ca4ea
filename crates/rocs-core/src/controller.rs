//! Control policies
//!
//! Two concrete policies share one evaluation capability
//! `u = controller(t, x)`: a time-indexed feedforward table and a linear
//! state-feedback law `u = uff(t) + K(t) x`. The variants form a tagged
//! enum; solvers pick one according to `use_feedback_policy`.

use crate::misc;
use crate::types::{Matrix, Scalar, Vector};

/// Time-indexed open-loop input table with linear interpolation.
#[derive(Clone, Debug, Default)]
pub struct FeedforwardController {
    pub time_stamp: Vec<Scalar>,
    pub inputs: Vec<Vector>,
}

impl FeedforwardController {
    pub fn new(time_stamp: Vec<Scalar>, inputs: Vec<Vector>) -> Self {
        debug_assert_eq!(time_stamp.len(), inputs.len());
        Self { time_stamp, inputs }
    }

    pub fn is_empty(&self) -> bool {
        self.time_stamp.is_empty()
    }

    pub fn compute_input(&self, t: Scalar, _x: &Vector) -> Vector {
        misc::interpolate_vector(&self.time_stamp, &self.inputs, t)
    }
}

/// Linear feedback policy `u(t, x) = uff(t) + K(t) x`.
///
/// `delta_bias` holds the feedforward increment produced by the most recent
/// backward pass; the search strategies fold `alpha * delta_bias` into
/// `bias` when trying a step and clear it on acceptance.
#[derive(Clone, Debug, Default)]
pub struct LinearController {
    pub time_stamp: Vec<Scalar>,
    pub bias: Vec<Vector>,
    pub gain: Vec<Matrix>,
    pub delta_bias: Vec<Vector>,
}

impl LinearController {
    pub fn is_empty(&self) -> bool {
        self.time_stamp.is_empty()
    }

    pub fn len(&self) -> usize {
        self.time_stamp.len()
    }

    pub fn clear(&mut self) {
        self.time_stamp.clear();
        self.bias.clear();
        self.gain.clear();
        self.delta_bias.clear();
    }

    pub fn compute_input(&self, t: Scalar, x: &Vector) -> Vector {
        let uff = misc::interpolate_vector(&self.time_stamp, &self.bias, t);
        let k = misc::interpolate_matrix(&self.time_stamp, &self.gain, t);
        uff + k * x
    }

    /// Feedback gain interpolated at `t`.
    pub fn feedback_gain(&self, t: Scalar) -> Matrix {
        misc::interpolate_matrix(&self.time_stamp, &self.gain, t)
    }

    /// Applies a fraction of the stored feedforward increments.
    pub fn step(&mut self, alpha: Scalar) {
        for (bias, delta) in self.bias.iter_mut().zip(self.delta_bias.iter()) {
            *bias += delta * alpha;
        }
    }

    /// Drops the feedforward increments after a step has been accepted.
    pub fn clear_delta_bias(&mut self) {
        self.delta_bias.clear();
        self.delta_bias.resize(self.time_stamp.len(), Vector::zeros(0));
    }

    /// Time-weighted integral of the squared feedforward increments; the
    /// line search uses it as the descent metric of the Armijo condition.
    pub fn update_integral_squared(&self) -> Scalar {
        if self.time_stamp.len() < 2 {
            return 0.0;
        }
        let norms: Vec<Scalar> = self
            .delta_bias
            .iter()
            .map(|d| d.norm_squared())
            .collect();
        misc::trapezoidal_integral(&self.time_stamp, &norms)
    }
}

/// Tagged policy variant.
#[derive(Clone, Debug)]
pub enum Controller {
    Feedforward(FeedforwardController),
    LinearFeedback(LinearController),
}

impl Controller {
    pub fn compute_input(&self, t: Scalar, x: &Vector) -> Vector {
        match self {
            Controller::Feedforward(c) => c.compute_input(t, x),
            Controller::LinearFeedback(c) => c.compute_input(t, x),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Controller::Feedforward(c) => c.is_empty(),
            Controller::LinearFeedback(c) => c.is_empty(),
        }
    }

    pub fn time_stamp(&self) -> &[Scalar] {
        match self {
            Controller::Feedforward(c) => &c.time_stamp,
            Controller::LinearFeedback(c) => &c.time_stamp,
        }
    }

    /// Feedback gain at `t`; meaningful only for the linear-feedback variant.
    pub fn feedback_gain(&self, t: Scalar) -> Option<Matrix> {
        match self {
            Controller::Feedforward(_) => None,
            Controller::LinearFeedback(c) => Some(c.feedback_gain(t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_controller_reproduces_nominal_input() {
        // u = uff + K x with uff = u_nom - K x_nom must give back u_nom.
        let x_nom = Vector::from_vec(vec![1.0, -2.0]);
        let u_nom = Vector::from_vec(vec![0.5]);
        let k = Matrix::from_row_slice(1, 2, &[2.0, 1.0]);
        let uff = &u_nom - &k * &x_nom;

        let ctrl = LinearController {
            time_stamp: vec![0.0, 1.0],
            bias: vec![uff.clone(), uff],
            gain: vec![k.clone(), k],
            delta_bias: vec![Vector::zeros(1), Vector::zeros(1)],
        };
        let u = ctrl.compute_input(0.3, &x_nom);
        assert!((u - u_nom).norm() < 1e-12);
    }

    #[test]
    fn inputs_beyond_final_timestamp_hold_last_value() {
        let ctrl = FeedforwardController::new(
            vec![0.0, 1.0],
            vec![Vector::from_vec(vec![1.0]), Vector::from_vec(vec![2.0])],
        );
        assert_eq!(ctrl.compute_input(5.0, &Vector::zeros(0))[0], 2.0);
    }

    #[test]
    fn step_applies_scaled_increments() {
        let mut ctrl = LinearController {
            time_stamp: vec![0.0],
            bias: vec![Vector::from_vec(vec![1.0])],
            gain: vec![Matrix::zeros(1, 1)],
            delta_bias: vec![Vector::from_vec(vec![2.0])],
        };
        ctrl.step(0.5);
        assert_eq!(ctrl.bias[0][0], 2.0);
    }
}
