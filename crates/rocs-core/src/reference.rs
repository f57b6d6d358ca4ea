//! Reference signals: mode schedule and target trajectories

use crate::error::SolverError;
use crate::misc;
use crate::types::{Scalar, Vector};

/// Ordered event times and the mode active on each inter-event interval.
///
/// With `n` event times there are `n + 1` modes; mode `i` is active on
/// `[t_{e,i-1}, t_{e,i})`.
#[derive(Clone, Debug)]
pub struct ModeSchedule {
    pub event_times: Vec<Scalar>,
    pub mode_sequence: Vec<usize>,
}

impl Default for ModeSchedule {
    fn default() -> Self {
        Self {
            event_times: Vec::new(),
            mode_sequence: vec![0],
        }
    }
}

impl ModeSchedule {
    pub fn new(event_times: Vec<Scalar>, mode_sequence: Vec<usize>) -> Result<Self, SolverError> {
        if mode_sequence.len() != event_times.len() + 1 {
            return Err(SolverError::Construction(format!(
                "mode schedule needs {} modes for {} event times, got {}",
                event_times.len() + 1,
                event_times.len(),
                mode_sequence.len()
            )));
        }
        if event_times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SolverError::Construction(
                "event times must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { event_times, mode_sequence })
    }

    /// Mode active at time `t`.
    pub fn mode_at_time(&self, t: Scalar) -> usize {
        let index = self.event_times.partition_point(|&te| te <= t);
        self.mode_sequence[index]
    }

    /// Event times strictly inside `(t0, tf)`.
    pub fn events_in_range(&self, t0: Scalar, tf: Scalar) -> Vec<Scalar> {
        self.event_times
            .iter()
            .copied()
            .filter(|&te| te > t0 + misc::WEAK_EPSILON && te < tf - misc::WEAK_EPSILON)
            .collect()
    }
}

/// Desired state/input trajectories tracked by the cost terms.
///
/// Queries interpolate linearly and hold the end points outside the stored
/// time range, so a single sample acts as a constant set point.
#[derive(Clone, Debug)]
pub struct TargetTrajectories {
    pub times: Vec<Scalar>,
    pub states: Vec<Vector>,
    pub inputs: Vec<Vector>,
}

impl Default for TargetTrajectories {
    fn default() -> Self {
        Self {
            times: vec![0.0],
            states: vec![Vector::zeros(0)],
            inputs: vec![Vector::zeros(0)],
        }
    }
}

impl TargetTrajectories {
    pub fn new(times: Vec<Scalar>, states: Vec<Vector>, inputs: Vec<Vector>) -> Self {
        debug_assert_eq!(times.len(), states.len());
        debug_assert_eq!(times.len(), inputs.len());
        Self { times, states, inputs }
    }

    /// Constant set point.
    pub fn set_point(state: Vector, input: Vector) -> Self {
        Self {
            times: vec![0.0],
            states: vec![state],
            inputs: vec![input],
        }
    }

    pub fn desired_state(&self, t: Scalar) -> Vector {
        misc::interpolate_vector(&self.times, &self.states, t)
    }

    pub fn desired_input(&self, t: Scalar) -> Vector {
        misc::interpolate_vector(&self.times, &self.inputs, t)
    }
}

/// Source of the mode schedule and target trajectories for a solver.
#[derive(Clone, Debug, Default)]
pub struct ReferenceManager {
    mode_schedule: ModeSchedule,
    target_trajectories: TargetTrajectories,
}

impl ReferenceManager {
    pub fn new(mode_schedule: ModeSchedule, target_trajectories: TargetTrajectories) -> Self {
        Self { mode_schedule, target_trajectories }
    }

    pub fn mode_schedule(&self) -> &ModeSchedule {
        &self.mode_schedule
    }

    pub fn target_trajectories(&self) -> &TargetTrajectories {
        &self.target_trajectories
    }

    pub fn set_mode_schedule(&mut self, mode_schedule: ModeSchedule) {
        self.mode_schedule = mode_schedule;
    }

    pub fn set_target_trajectories(&mut self, target_trajectories: TargetTrajectories) {
        self.target_trajectories = target_trajectories;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_lookup_respects_event_boundaries() {
        let schedule = ModeSchedule::new(vec![1.0, 2.0], vec![0, 1, 2]).unwrap();
        assert_eq!(schedule.mode_at_time(0.5), 0);
        assert_eq!(schedule.mode_at_time(1.0), 1);
        assert_eq!(schedule.mode_at_time(1.5), 1);
        assert_eq!(schedule.mode_at_time(3.0), 2);
    }

    #[test]
    fn mode_schedule_rejects_bad_shapes() {
        assert!(ModeSchedule::new(vec![1.0], vec![0]).is_err());
        assert!(ModeSchedule::new(vec![2.0, 1.0], vec![0, 1, 2]).is_err());
    }

    #[test]
    fn set_point_holds_constant_reference() {
        let targets =
            TargetTrajectories::set_point(Vector::from_vec(vec![4.0, 2.0]), Vector::zeros(1));
        assert_eq!(targets.desired_state(-10.0)[0], 4.0);
        assert_eq!(targets.desired_state(10.0)[1], 2.0);
        assert_eq!(targets.desired_input(3.0).len(), 1);
    }
}
