//! Primal solution

use crate::controller::Controller;
use crate::misc;
use crate::reference::ModeSchedule;
use crate::types::{Scalar, Vector};

/// Optimized trajectories and the policy that produced them.
///
/// Input trajectories are stored length-equalized to the state trajectory,
/// repeating the terminal input.
#[derive(Clone, Debug)]
pub struct PrimalSolution {
    pub time_trajectory: Vec<Scalar>,
    pub state_trajectory: Vec<Vector>,
    pub input_trajectory: Vec<Vector>,
    pub post_event_indices: Vec<usize>,
    pub mode_schedule: ModeSchedule,
    pub controller: Option<Controller>,
}

impl Default for PrimalSolution {
    fn default() -> Self {
        Self {
            time_trajectory: Vec::new(),
            state_trajectory: Vec::new(),
            input_trajectory: Vec::new(),
            post_event_indices: Vec::new(),
            mode_schedule: ModeSchedule::default(),
            controller: None,
        }
    }
}

impl PrimalSolution {
    pub fn is_empty(&self) -> bool {
        self.time_trajectory.is_empty()
    }

    pub fn final_time(&self) -> Option<Scalar> {
        self.time_trajectory.last().copied()
    }

    /// State interpolated at `t`.
    pub fn state_at(&self, t: Scalar) -> Vector {
        misc::interpolate_vector(&self.time_trajectory, &self.state_trajectory, t)
    }

    /// Input interpolated at `t`.
    pub fn input_at(&self, t: Scalar) -> Vector {
        misc::interpolate_vector(&self.time_trajectory, &self.input_trajectory, t)
    }

    /// Deep copy truncated to `[t_0, final_time]`. Samples strictly after
    /// `final_time` are dropped; the controller is kept untruncated so the
    /// policy remains evaluable over its full range.
    pub fn truncated(&self, final_time: Scalar) -> PrimalSolution {
        let keep = self
            .time_trajectory
            .partition_point(|&t| t <= final_time + misc::WEAK_EPSILON);
        PrimalSolution {
            time_trajectory: self.time_trajectory[..keep].to_vec(),
            state_trajectory: self.state_trajectory[..keep].to_vec(),
            input_trajectory: self.input_trajectory[..keep].to_vec(),
            post_event_indices: self
                .post_event_indices
                .iter()
                .copied()
                .filter(|&i| i < keep)
                .collect(),
            mode_schedule: self.mode_schedule.clone(),
            controller: self.controller.clone(),
        }
    }
}
