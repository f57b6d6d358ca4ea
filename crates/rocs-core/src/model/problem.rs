//! The optimal-control problem bundle

use crate::model::collection::TermCollection;
use crate::model::constraint::{StateConstraint, StateInputConstraint};
use crate::model::cost::{StateCost, StateInputCost};
use crate::model::dynamics::SystemDynamics;
use crate::model::penalty::SoftConstraintPenalty;
use crate::model::precomputation::{DefaultPreComputation, PreComputation};
use crate::reference::TargetTrajectories;

/// Everything that defines one optimal-control problem.
///
/// The bundle exclusively owns its term collections, and the collections
/// exclusively own their terms; `Clone` produces a fully independent copy,
/// which is how each solver worker gets its own problem (and thread-local
/// pre-computation caches).
#[derive(Clone)]
pub struct OptimalControlProblem {
    /// Hybrid system dynamics
    pub dynamics: Box<dyn SystemDynamics>,

    /// Running cost terms
    pub cost: TermCollection<dyn StateInputCost>,
    /// Terminal cost terms
    pub final_cost: TermCollection<dyn StateCost>,
    /// Cost terms charged at pre-jump states
    pub pre_jump_cost: TermCollection<dyn StateCost>,

    /// State-input equality constraints (`g = 0`)
    pub equality_constraints: TermCollection<dyn StateInputConstraint>,
    /// State-only equality constraints (`g = 0`)
    pub state_equality_constraints: TermCollection<dyn StateConstraint>,
    /// Inequality constraints (`g >= 0`), handled through the soft penalty
    pub inequality_constraints: TermCollection<dyn StateInputConstraint>,
    /// Penalty reformulation of the inequality constraints
    pub soft_constraint_penalty: SoftConstraintPenalty,

    /// Shared-intermediate-results hook, requested before term evaluations
    pub pre_computation: Box<dyn PreComputation>,

    /// Reference trajectories the cost terms track; installed by the solver
    /// from its reference manager before every run
    pub target_trajectories: TargetTrajectories,
}

impl OptimalControlProblem {
    pub fn new(dynamics: Box<dyn SystemDynamics>) -> Self {
        Self {
            dynamics,
            cost: TermCollection::new(),
            final_cost: TermCollection::new(),
            pre_jump_cost: TermCollection::new(),
            equality_constraints: TermCollection::new(),
            state_equality_constraints: TermCollection::new(),
            inequality_constraints: TermCollection::new(),
            soft_constraint_penalty: SoftConstraintPenalty::default(),
            pre_computation: Box::new(DefaultPreComputation),
            target_trajectories: TargetTrajectories::default(),
        }
    }
}

impl std::fmt::Debug for OptimalControlProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimalControlProblem")
            .field("cost", &self.cost)
            .field("final_cost", &self.final_cost)
            .field("pre_jump_cost", &self.pre_jump_cost)
            .field("equality_constraints", &self.equality_constraints)
            .field("state_equality_constraints", &self.state_equality_constraints)
            .field("inequality_constraints", &self.inequality_constraints)
            .finish()
    }
}
