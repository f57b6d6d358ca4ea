//! Hybrid system rollout
//!
//! Integrates the closed-loop flow over `[t_0, t_f]` with an embedded
//! Runge-Kutta-Fehlberg 4(5) scheme, stopping exactly at every event time of
//! the mode schedule, applying the jump map there and recording the index of
//! the post-event sample.

use serde::{Deserialize, Serialize};

use crate::controller::Controller;
use crate::error::SolverError;
use crate::misc;
use crate::model::dynamics::SystemDynamics;
use crate::model::precomputation::PreComputation;
use crate::reference::ModeSchedule;
use crate::types::{Scalar, Vector};

/// Adaptive-integration settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolloutSettings {
    /// Absolute ODE error tolerance
    pub abs_tol_ode: Scalar,
    /// Relative ODE error tolerance
    pub rel_tol_ode: Scalar,
    /// Initial (and maximum) integration step
    pub time_step: Scalar,
    /// Step budget per second of horizon; exceeding it is fatal
    pub max_num_steps_per_second: usize,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            abs_tol_ode: 1e-9,
            rel_tol_ode: 1e-6,
            time_step: 1e-2,
            max_num_steps_per_second: 10_000,
        }
    }
}

/// Trajectories produced by one rollout.
#[derive(Clone, Debug, Default)]
pub struct RolloutOutput {
    pub time_trajectory: Vec<Scalar>,
    pub state_trajectory: Vec<Vector>,
    pub input_trajectory: Vec<Vector>,
    /// Index of the sample right after each applied jump
    pub post_event_indices: Vec<usize>,
}

impl RolloutOutput {
    pub fn len(&self) -> usize {
        self.time_trajectory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_trajectory.is_empty()
    }

    /// True when sample `k` is the last sample before a jump.
    pub fn is_pre_event(&self, k: usize) -> bool {
        self.post_event_indices.iter().any(|&p| p > 0 && p - 1 == k)
    }
}

/// Rollout driven purely by the mode schedule's event times.
///
/// Problem components are borrowed for the duration of `run` and never
/// retained.
#[derive(Clone, Debug)]
pub struct TimeTriggeredRollout {
    settings: RolloutSettings,
}

impl TimeTriggeredRollout {
    pub fn new(settings: RolloutSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RolloutSettings {
        &self.settings
    }

    /// Integrates the controlled hybrid system from `(t0, x0)` to `tf`.
    pub fn run(
        &self,
        dynamics: &dyn SystemDynamics,
        precomp: &dyn PreComputation,
        t0: Scalar,
        x0: &Vector,
        tf: Scalar,
        controller: &Controller,
        mode_schedule: &ModeSchedule,
    ) -> Result<RolloutOutput, SolverError> {
        if controller.is_empty() {
            return Err(SolverError::Configuration(
                "rollout requires a non-empty controller".to_string(),
            ));
        }
        if tf <= t0 {
            return Err(SolverError::Configuration(format!(
                "rollout interval is empty: [{t0}, {tf}]"
            )));
        }

        let max_num_steps = self.settings.max_num_steps_per_second
            * (tf - t0).max(1.0).ceil() as usize;
        let mut output = RolloutOutput::default();
        let mut steps_taken = 0usize;

        let mut x = x0.clone();

        // Jumps scheduled at (or numerically before) the start time are
        // applied to the initial state; the first recorded sample is then
        // already post-event.
        for &te in &mode_schedule.event_times {
            if (te - t0).abs() <= misc::WEAK_EPSILON {
                x = dynamics.jump_map(t0, &x, precomp);
                output.post_event_indices.push(0);
            }
        }

        // Mandatory integration boundaries.
        let interior_events = mode_schedule.events_in_range(t0, tf);
        let mut boundaries = Vec::with_capacity(interior_events.len() + 2);
        boundaries.push(t0);
        boundaries.extend(interior_events.iter().copied());
        boundaries.push(tf);

        for segment in 0..boundaries.len() - 1 {
            let (a, b) = (boundaries[segment], boundaries[segment + 1]);

            self.push_sample(&mut output, dynamics, precomp, controller, a, &x)?;
            self.integrate_segment(
                dynamics,
                precomp,
                controller,
                a,
                b,
                &mut x,
                &mut output,
                &mut steps_taken,
                max_num_steps,
            )?;

            // Apply the jump at every interior boundary.
            if segment + 1 < boundaries.len() - 1 {
                x = dynamics.jump_map(b, &x, precomp);
                output.post_event_indices.push(output.state_trajectory.len());
            }
        }

        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_segment(
        &self,
        dynamics: &dyn SystemDynamics,
        precomp: &dyn PreComputation,
        controller: &Controller,
        a: Scalar,
        b: Scalar,
        x: &mut Vector,
        output: &mut RolloutOutput,
        steps_taken: &mut usize,
        max_num_steps: usize,
    ) -> Result<(), SolverError> {
        let flow = |t: Scalar, x: &Vector| -> Vector {
            let u = controller.compute_input(t, x);
            dynamics.flow_map(t, x, &u, precomp)
        };

        let min_step = (b - a) * 1e-10;
        let mut t = a;
        let mut h = self.settings.time_step.min(b - a);

        while b - t > misc::WEAK_EPSILON {
            h = h.min(b - t);

            let (x_next, error) = rkf45_step(&flow, t, x, h);
            let tol = self.settings.abs_tol_ode + self.settings.rel_tol_ode * x.norm();

            if error <= tol || h <= min_step {
                t += h;
                *x = x_next;
                if x.iter().any(|v| !v.is_finite()) {
                    return Err(SolverError::IntegrationFailure(format!(
                        "state became non-finite at t = {t:.6}"
                    )));
                }
                self.push_sample(output, dynamics, precomp, controller, t, x)?;

                *steps_taken += 1;
                if *steps_taken > max_num_steps {
                    return Err(SolverError::IntegrationFailure(format!(
                        "step budget of {max_num_steps} exhausted at t = {t:.6}"
                    )));
                }
            }

            // Step-size controller of the embedded 4(5) pair.
            let scale = if error > 1e-14 {
                (0.84 * (tol / error).powf(0.25)).clamp(0.1, 4.0)
            } else {
                4.0
            };
            h = (h * scale).max(min_step).min(self.settings.time_step);
        }

        Ok(())
    }

    fn push_sample(
        &self,
        output: &mut RolloutOutput,
        _dynamics: &dyn SystemDynamics,
        _precomp: &dyn PreComputation,
        controller: &Controller,
        t: Scalar,
        x: &Vector,
    ) -> Result<(), SolverError> {
        let u = controller.compute_input(t, x);
        if u.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::IntegrationFailure(format!(
                "controller produced a non-finite input at t = {t:.6}"
            )));
        }
        output.time_trajectory.push(t);
        output.state_trajectory.push(x.clone());
        output.input_trajectory.push(u);
        Ok(())
    }
}

/// One Runge-Kutta-Fehlberg 4(5) step; returns the 5th-order solution and
/// the embedded error estimate.
fn rkf45_step<F>(f: &F, t: Scalar, x: &Vector, dt: Scalar) -> (Vector, Scalar)
where
    F: Fn(Scalar, &Vector) -> Vector,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 4.0, &(x + &k1 * (dt / 4.0)));
    let k3 = f(
        t + 3.0 * dt / 8.0,
        &(x + &k1 * (3.0 * dt / 32.0) + &k2 * (9.0 * dt / 32.0)),
    );
    let k4 = f(
        t + 12.0 * dt / 13.0,
        &(x + &k1 * (1932.0 * dt / 2197.0) - &k2 * (7200.0 * dt / 2197.0)
            + &k3 * (7296.0 * dt / 2197.0)),
    );
    let k5 = f(
        t + dt,
        &(x + &k1 * (439.0 * dt / 216.0) - &k2 * (8.0 * dt) + &k3 * (3680.0 * dt / 513.0)
            - &k4 * (845.0 * dt / 4104.0)),
    );
    let k6 = f(
        t + dt / 2.0,
        &(x - &k1 * (8.0 * dt / 27.0) + &k2 * (2.0 * dt) - &k3 * (3544.0 * dt / 2565.0)
            + &k4 * (1859.0 * dt / 4104.0)
            - &k5 * (11.0 * dt / 40.0)),
    );

    let x4 = x + (&k1 * (25.0 / 216.0) + &k3 * (1408.0 / 2565.0) + &k4 * (2197.0 / 4104.0)
        - &k5 * (1.0 / 5.0))
        * dt;
    let x5 = x + (&k1 * (16.0 / 135.0)
        + &k3 * (6656.0 / 12825.0)
        + &k4 * (28561.0 / 56430.0)
        - &k5 * (9.0 / 50.0)
        + &k6 * (2.0 / 55.0))
        * dt;

    let error = (&x5 - &x4).norm();
    (x5, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::FeedforwardController;
    use crate::model::dynamics::{LinearSystemDynamics, SystemDynamics};
    use crate::model::precomputation::DefaultPreComputation;
    use crate::types::Matrix;
    use approx::assert_relative_eq;

    /// Single integrator whose jump halves the state.
    #[derive(Clone)]
    struct HalvingIntegrator;

    impl SystemDynamics for HalvingIntegrator {
        fn flow_map(
            &self,
            _t: Scalar,
            _x: &Vector,
            u: &Vector,
            _p: &dyn crate::model::precomputation::PreComputation,
        ) -> Vector {
            u.clone()
        }

        fn flow_map_linear_approximation(
            &self,
            t: Scalar,
            x: &Vector,
            u: &Vector,
            p: &dyn crate::model::precomputation::PreComputation,
        ) -> crate::types::VectorFunctionLinearApproximation {
            crate::types::VectorFunctionLinearApproximation {
                f: self.flow_map(t, x, u, p),
                dfdx: Matrix::zeros(1, 1),
                dfdu: Matrix::identity(1, 1),
            }
        }

        fn jump_map(
            &self,
            _t: Scalar,
            x: &Vector,
            _p: &dyn crate::model::precomputation::PreComputation,
        ) -> Vector {
            x * 0.5
        }

        fn clone_boxed(&self) -> Box<dyn SystemDynamics> {
            Box::new(self.clone())
        }
    }

    fn constant_input_controller(u: Scalar) -> Controller {
        Controller::Feedforward(FeedforwardController::new(
            vec![0.0, 1.0],
            vec![Vector::from_vec(vec![u]), Vector::from_vec(vec![u])],
        ))
    }

    #[test]
    fn integrates_linear_system_accurately() {
        // dx/dt = -x, x(0) = 1 -> x(1) = e^-1
        let dynamics =
            LinearSystemDynamics::new(Matrix::from_row_slice(1, 1, &[-1.0]), Matrix::zeros(1, 1));
        let rollout = TimeTriggeredRollout::new(RolloutSettings::default());
        let out = rollout
            .run(
                &dynamics,
                &DefaultPreComputation,
                0.0,
                &Vector::from_vec(vec![1.0]),
                1.0,
                &constant_input_controller(0.0),
                &ModeSchedule::default(),
            )
            .unwrap();
        assert_relative_eq!(out.state_trajectory.last().unwrap()[0], (-1.0f64).exp(),
                            epsilon = 1e-6);
        assert_relative_eq!(*out.time_trajectory.last().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stops_at_event_and_applies_jump() {
        let schedule = ModeSchedule::new(vec![0.5], vec![0, 1]).unwrap();
        let rollout = TimeTriggeredRollout::new(RolloutSettings::default());
        let out = rollout
            .run(
                &HalvingIntegrator,
                &DefaultPreComputation,
                0.0,
                &Vector::from_vec(vec![1.0]),
                1.0,
                &constant_input_controller(1.0),
                &schedule,
            )
            .unwrap();

        assert_eq!(out.post_event_indices.len(), 1);
        let p = out.post_event_indices[0];
        // Pre-event and post-event samples share the event time.
        assert_relative_eq!(out.time_trajectory[p - 1], 0.5, epsilon = 1e-9);
        assert_relative_eq!(out.time_trajectory[p], 0.5, epsilon = 1e-9);
        // x ramps to 1.5, jumps to 0.75, ramps on to 1.25.
        assert_relative_eq!(out.state_trajectory[p - 1][0], 1.5, epsilon = 1e-6);
        assert_relative_eq!(out.state_trajectory[p][0], 0.75, epsilon = 1e-6);
        assert_relative_eq!(out.state_trajectory.last().unwrap()[0], 1.25, epsilon = 1e-6);
    }

    #[test]
    fn event_at_start_time_jumps_the_initial_state() {
        let schedule = ModeSchedule::new(vec![0.0], vec![0, 1]).unwrap();
        let rollout = TimeTriggeredRollout::new(RolloutSettings::default());
        let out = rollout
            .run(
                &HalvingIntegrator,
                &DefaultPreComputation,
                0.0,
                &Vector::from_vec(vec![2.0]),
                1.0,
                &constant_input_controller(0.0),
                &schedule,
            )
            .unwrap();
        assert_eq!(out.post_event_indices[0], 0);
        assert_relative_eq!(out.state_trajectory[0][0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn exhausted_step_budget_is_fatal() {
        let settings = RolloutSettings {
            max_num_steps_per_second: 3,
            time_step: 1e-3,
            ..Default::default()
        };
        let dynamics =
            LinearSystemDynamics::new(Matrix::from_row_slice(1, 1, &[-1.0]), Matrix::zeros(1, 1));
        let rollout = TimeTriggeredRollout::new(settings);
        let result = rollout.run(
            &dynamics,
            &DefaultPreComputation,
            0.0,
            &Vector::from_vec(vec![1.0]),
            1.0,
            &constant_input_controller(0.0),
            &ModeSchedule::default(),
        );
        assert!(matches!(result, Err(SolverError::IntegrationFailure(_))));
    }
}
