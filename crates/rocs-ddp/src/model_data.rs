//! Per-stage model data and the linear-quadratic approximator
//!
//! For every sample of the nominal rollout the solver stores the flow-map
//! linearization, the quadratic running-cost approximation and the
//! constraint linearizations; pre-event samples additionally carry the jump
//! linearization and the pre-jump cost.

use rocs_core::model::constraint as constraint_eval;
use rocs_core::model::cost as cost_eval;
use rocs_core::model::precomputation::Request;
use rocs_core::model::OptimalControlProblem;
use rocs_core::performance::PerformanceIndex;
use rocs_core::rollout::RolloutOutput;
use rocs_core::types::{Scalar, ScalarFunctionQuadraticApproximation, Vector,
                       VectorFunctionLinearApproximation};
use rocs_core::{misc, SolverError};

/// Local model of the problem around one nominal sample.
#[derive(Clone, Debug, Default)]
pub struct ModelData {
    pub time: Scalar,
    pub state_dim: usize,
    pub input_dim: usize,
    /// Flow-map linearization at interior samples, jump-map linearization
    /// at pre-event samples
    pub dynamics: VectorFunctionLinearApproximation,
    /// Affine dynamics drift relative to the nominal (zero along an exact
    /// rollout)
    pub dynamics_bias: Vector,
    /// Quadratic cost approximation (running-cost rate at interior samples,
    /// pre-jump cost at event samples)
    pub cost: ScalarFunctionQuadraticApproximation,
    pub state_eq_constraint: VectorFunctionLinearApproximation,
    pub state_input_eq_constraint: VectorFunctionLinearApproximation,
    pub ineq_constraint: VectorFunctionLinearApproximation,
}

impl ModelData {
    /// NaN/Inf screen over every stored block.
    pub fn check_numerics(&self) -> Result<(), SolverError> {
        let describe = |what: &str, detail: String| {
            SolverError::NumericalInstability(format!(
                "{what} at time {:.6}: {detail}",
                self.time
            ))
        };
        self.dynamics
            .check_finite()
            .map_err(|e| describe("dynamics approximation", e))?;
        self.cost
            .check_finite()
            .map_err(|e| describe("cost approximation", e))?;
        self.state_eq_constraint
            .check_finite()
            .map_err(|e| describe("state equality constraint", e))?;
        self.state_input_eq_constraint
            .check_finite()
            .map_err(|e| describe("state-input equality constraint", e))?;
        self.ineq_constraint
            .check_finite()
            .map_err(|e| describe("inequality constraint", e))?;
        Ok(())
    }
}

/// Builds the LQ approximation of one problem around nominal samples.
pub struct LinearQuadraticApproximator<'a> {
    problem: &'a mut OptimalControlProblem,
    check_numerics: bool,
}

impl<'a> LinearQuadraticApproximator<'a> {
    pub fn new(problem: &'a mut OptimalControlProblem, check_numerics: bool) -> Self {
        Self { problem, check_numerics }
    }

    /// Approximation at an interior sample.
    pub fn approximate(
        &mut self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> Result<ModelData, SolverError> {
        let request = Request::COST
            | Request::SOFT_CONSTRAINT
            | Request::CONSTRAINT
            | Request::DYNAMICS
            | Request::APPROXIMATION;
        self.problem.pre_computation.request(request, time, state, input);
        let problem = &*self.problem;
        let precomp = problem.pre_computation.as_ref();

        let data = ModelData {
            time,
            state_dim: state.len(),
            input_dim: input.len(),
            dynamics: problem
                .dynamics
                .flow_map_linear_approximation(time, state, input, precomp),
            dynamics_bias: Vector::zeros(state.len()),
            cost: cost_eval::collection_quadratic_approximation(
                &problem.cost,
                time,
                state,
                input,
                &problem.target_trajectories,
                precomp,
            ),
            state_eq_constraint: constraint_eval::state_collection_linear_approximation(
                &problem.state_equality_constraints,
                time,
                state,
                precomp,
            ),
            state_input_eq_constraint: constraint_eval::collection_linear_approximation(
                &problem.equality_constraints,
                time,
                state,
                input,
                precomp,
            ),
            ineq_constraint: constraint_eval::collection_linear_approximation(
                &problem.inequality_constraints,
                time,
                state,
                input,
                precomp,
            ),
        };

        if data.state_input_eq_constraint.num_rows() > input.len() {
            return Err(SolverError::Construction(
                "more active state-input equality constraints than inputs".to_string(),
            ));
        }

        if self.check_numerics {
            data.check_numerics()?;
        }
        Ok(data)
    }

    /// Approximation at a pre-event sample: jump linearization plus
    /// pre-jump cost, with an empty input block.
    pub fn approximate_at_event(
        &mut self,
        time: Scalar,
        state: &Vector,
    ) -> Result<ModelData, SolverError> {
        let request =
            Request::COST | Request::CONSTRAINT | Request::DYNAMICS | Request::APPROXIMATION;
        self.problem.pre_computation.request_pre_jump(request, time, state);
        let problem = &*self.problem;
        let precomp = problem.pre_computation.as_ref();

        let data = ModelData {
            time,
            state_dim: state.len(),
            input_dim: 0,
            dynamics: problem
                .dynamics
                .jump_map_linear_approximation(time, state, precomp),
            dynamics_bias: Vector::zeros(state.len()),
            cost: cost_eval::state_collection_quadratic_approximation(
                &problem.pre_jump_cost,
                time,
                state,
                &problem.target_trajectories,
                precomp,
            ),
            state_eq_constraint: VectorFunctionLinearApproximation::zero(0, state.len(), 0),
            state_input_eq_constraint: VectorFunctionLinearApproximation::zero(0, state.len(), 0),
            ineq_constraint: VectorFunctionLinearApproximation::zero(0, state.len(), 0),
        };

        if self.check_numerics {
            data.check_numerics()?;
        }
        Ok(data)
    }

    /// Terminal-cost quadratic plus the final state-equality linearization.
    pub fn approximate_at_final(
        &mut self,
        time: Scalar,
        state: &Vector,
    ) -> Result<(ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation), SolverError>
    {
        let request = Request::COST | Request::CONSTRAINT | Request::APPROXIMATION;
        self.problem.pre_computation.request_final(request, time, state);
        let problem = &*self.problem;
        let precomp = problem.pre_computation.as_ref();

        let cost = cost_eval::state_collection_quadratic_approximation(
            &problem.final_cost,
            time,
            state,
            &problem.target_trajectories,
            precomp,
        );
        let state_eq = constraint_eval::state_collection_linear_approximation(
            &problem.state_equality_constraints,
            time,
            state,
            precomp,
        );
        if self.check_numerics {
            cost.check_finite()
                .map_err(SolverError::NumericalInstability)?;
        }
        Ok((cost, state_eq))
    }
}

/// Folds the penalized constraints into a cost approximation: quadratic
/// penalty on the state-only equality residual and the soft-constraint
/// penalty on the inequality linearization.
pub fn augment_cost(
    data: &mut ModelData,
    state_eq_penalty_coeff: Scalar,
    penalty: &rocs_core::model::penalty::SoftConstraintPenalty,
) {
    if data.state_eq_constraint.num_rows() > 0 {
        let hv = &data.state_eq_constraint.f;
        let fm = &data.state_eq_constraint.dfdx;
        data.cost.f += 0.5 * state_eq_penalty_coeff * hv.norm_squared();
        data.cost.dfdx += fm.transpose() * hv * state_eq_penalty_coeff;
        data.cost.dfdxx += fm.transpose() * fm * state_eq_penalty_coeff;
    }

    if data.ineq_constraint.num_rows() > 0 {
        let ineq_quad = penalty.quadratic_approximation(data.time, &data.ineq_constraint);
        data.cost += &ineq_quad;
    }
}

/// Cost, constraint-violation and penalty accounting along a rollout.
///
/// Running quantities are integrated trapezoidally over the rollout grid;
/// pre-jump costs are charged at pre-event samples and the terminal cost and
/// final state-equality residual at the last sample.
pub fn evaluate_rollout_performance(
    problem: &mut OptimalControlProblem,
    rollout: &RolloutOutput,
) -> Result<PerformanceIndex, SolverError> {
    let n = rollout.len();
    if n == 0 {
        return Ok(PerformanceIndex::default());
    }

    let mut cost_rate = vec![0.0; n];
    let mut state_eq_rate = vec![0.0; n];
    let mut state_input_eq_rate = vec![0.0; n];
    let mut ineq_rate = vec![0.0; n];
    let mut penalty_rate = vec![0.0; n];
    let mut performance = PerformanceIndex::default();

    let request = Request::COST | Request::SOFT_CONSTRAINT | Request::CONSTRAINT;
    for k in 0..n {
        let t = rollout.time_trajectory[k];
        let x = &rollout.state_trajectory[k];
        let u = &rollout.input_trajectory[k];

        problem.pre_computation.request(request, t, x, u);
        let precomp = problem.pre_computation.as_ref();

        cost_rate[k] = cost_eval::collection_value(
            &problem.cost,
            t,
            x,
            u,
            &problem.target_trajectories,
            precomp,
        );
        if !cost_rate[k].is_finite() {
            return Err(SolverError::NumericalInstability(format!(
                "running cost is not finite at t = {t:.6}"
            )));
        }

        let g_state = constraint_eval::state_collection_value(
            &problem.state_equality_constraints,
            t,
            x,
            precomp,
        );
        state_eq_rate[k] = g_state.norm_squared();

        let g_state_input =
            constraint_eval::collection_value(&problem.equality_constraints, t, x, u, precomp);
        state_input_eq_rate[k] = g_state_input.norm_squared();

        let h = constraint_eval::collection_value(
            &problem.inequality_constraints,
            t,
            x,
            u,
            precomp,
        );
        ineq_rate[k] = h.iter().map(|&hi| hi.min(0.0).powi(2)).sum();
        penalty_rate[k] = problem.soft_constraint_penalty.value(t, &h);

        // Pre-jump cost at the sample right before each jump.
        if rollout.is_pre_event(k) {
            problem.pre_computation.request_pre_jump(request, t, x);
            performance.total_cost += cost_eval::state_collection_value(
                &problem.pre_jump_cost,
                t,
                x,
                &problem.target_trajectories,
                problem.pre_computation.as_ref(),
            );
        }
    }

    let times = &rollout.time_trajectory;
    performance.total_cost += misc::trapezoidal_integral(times, &cost_rate);
    performance.state_eq_constraint_ise = misc::trapezoidal_integral(times, &state_eq_rate);
    performance.state_input_eq_constraint_ise =
        misc::trapezoidal_integral(times, &state_input_eq_rate);
    performance.inequality_constraint_ise = misc::trapezoidal_integral(times, &ineq_rate);
    performance.inequality_constraint_penalty =
        misc::trapezoidal_integral(times, &penalty_rate);

    // Terminal cost and final state-equality residual.
    let t_final = *times.last().unwrap();
    let x_final = rollout.state_trajectory.last().unwrap();
    problem
        .pre_computation
        .request_final(request, t_final, x_final);
    let precomp = problem.pre_computation.as_ref();
    performance.total_cost += cost_eval::state_collection_value(
        &problem.final_cost,
        t_final,
        x_final,
        &problem.target_trajectories,
        precomp,
    );
    performance.state_eq_constraint_ise += constraint_eval::state_collection_value(
        &problem.state_equality_constraints,
        t_final,
        x_final,
        precomp,
    )
    .norm_squared();

    if !performance.total_cost.is_finite() {
        return Err(SolverError::NumericalInstability(
            "rollout cost is not finite".to_string(),
        ));
    }

    performance.update_merit();
    Ok(performance)
}
