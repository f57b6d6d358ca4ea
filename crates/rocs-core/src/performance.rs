//! Performance index
//!
//! Scalar summary of one rollout or one shooting evaluation. Addition
//! concatenates horizon pieces; `merit` is maintained as
//! `total_cost + inequality_constraint_penalty` (the step-acceptance
//! strategies build their own augmented acceptance values from the stored
//! constraint measures).

use crate::types::Scalar;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PerformanceIndex {
    /// Merit value, kept equal to `total_cost + inequality_constraint_penalty`
    pub merit: Scalar,
    /// Integrated running cost plus event and terminal costs
    pub total_cost: Scalar,
    /// ISE of the state-only equality constraints (for the SQP solver this
    /// also accumulates the shooting-gap defects and the initial-state
    /// mismatch)
    pub state_eq_constraint_ise: Scalar,
    /// ISE of the state-input equality constraints
    pub state_input_eq_constraint_ise: Scalar,
    /// ISE of the inequality-constraint violations
    pub inequality_constraint_ise: Scalar,
    /// Accumulated soft-constraint penalty
    pub inequality_constraint_penalty: Scalar,
}

impl PerformanceIndex {
    /// Recomputes the merit invariant from the cost and penalty fields.
    pub fn update_merit(&mut self) {
        self.merit = self.total_cost + self.inequality_constraint_penalty;
    }

    /// Root of the summed constraint-violation measures, used by the SQP
    /// filter line search.
    pub fn constraint_violation(&self) -> Scalar {
        (self.state_eq_constraint_ise
            + self.state_input_eq_constraint_ise
            + self.inequality_constraint_ise)
            .sqrt()
    }
}

impl std::ops::AddAssign for PerformanceIndex {
    fn add_assign(&mut self, rhs: Self) {
        self.merit += rhs.merit;
        self.total_cost += rhs.total_cost;
        self.state_eq_constraint_ise += rhs.state_eq_constraint_ise;
        self.state_input_eq_constraint_ise += rhs.state_input_eq_constraint_ise;
        self.inequality_constraint_ise += rhs.inequality_constraint_ise;
        self.inequality_constraint_penalty += rhs.inequality_constraint_penalty;
    }
}

impl std::ops::Add for PerformanceIndex {
    type Output = PerformanceIndex;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl std::fmt::Display for PerformanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "merit: {:.6e}  cost: {:.6e}  state-eq ISE: {:.3e}  state-input-eq ISE: {:.3e}  \
             ineq ISE: {:.3e}  ineq penalty: {:.3e}",
            self.merit,
            self.total_cost,
            self.state_eq_constraint_ise,
            self.state_input_eq_constraint_ise,
            self.inequality_constraint_ise,
            self.inequality_constraint_penalty
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merit_invariant_survives_accumulation() {
        let mut a = PerformanceIndex {
            total_cost: 1.0,
            inequality_constraint_penalty: 0.25,
            ..Default::default()
        };
        a.update_merit();
        let mut b = PerformanceIndex {
            total_cost: 2.0,
            inequality_constraint_penalty: 0.5,
            ..Default::default()
        };
        b.update_merit();
        a += b;
        assert!(
            (a.merit - (a.total_cost + a.inequality_constraint_penalty)).abs() < 1e-12
        );
    }
}
