//! Multiple-shooting transcription
//!
//! Turns one shooting interval into a stage of the structured QP: the
//! sensitivity-aware discretization of the flow, the stage-cost quadratic,
//! the equality-constraint linearization and, optionally, its null-space
//! projection. Event nodes contribute the jump linearization and pre-jump
//! cost; the terminal node the terminal-cost quadratic.

use rocs_core::linalg;
use rocs_core::model::constraint as constraint_eval;
use rocs_core::model::cost as cost_eval;
use rocs_core::model::precomputation::Request;
use rocs_core::model::OptimalControlProblem;
use rocs_core::performance::PerformanceIndex;
use rocs_core::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector,
                       VectorFunctionLinearApproximation};

use crate::settings::IntegratorType;

/// LQ data of one shooting node.
#[derive(Clone, Debug, Default)]
pub struct NodeTranscription {
    pub performance: PerformanceIndex,
    /// Discretized dynamics; the constant term holds the shooting gap
    /// `x_pred(x_k, u_k) - x_{k+1}`
    pub dynamics: VectorFunctionLinearApproximation,
    pub cost: ScalarFunctionQuadraticApproximation,
    /// Stacked equality constraints left for the QP (empty when projected)
    pub constraints: VectorFunctionLinearApproximation,
    /// Null-space parametrization `du = f + dfdx dx + dfdu dv`; zero rows
    /// when no projection is active at this node
    pub projection: VectorFunctionLinearApproximation,
}

/// Discretizes the flow over `[t, t + dt]`, returning the predicted next
/// state together with its sensitivities.
pub fn sensitivity_discretization(
    problem: &OptimalControlProblem,
    integrator: IntegratorType,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    u: &Vector,
) -> VectorFunctionLinearApproximation {
    let nx = x.len();
    let precomp = problem.pre_computation.as_ref();
    let eval = |ti: Scalar, xi: &Vector| {
        problem
            .dynamics
            .flow_map_linear_approximation(ti, xi, u, precomp)
    };
    let identity = Matrix::identity(nx, nx);

    match integrator {
        IntegratorType::Euler => {
            let k1 = eval(t, x);
            VectorFunctionLinearApproximation {
                f: x + &k1.f * dt,
                dfdx: &identity + &k1.dfdx * dt,
                dfdu: &k1.dfdu * dt,
            }
        }
        IntegratorType::Rk2 => {
            // Heun's method with chain-rule sensitivities.
            let k1 = eval(t, x);
            let k2 = eval(t + dt, &(x + &k1.f * dt));
            let dk2_dx = &k2.dfdx * (&identity + &k1.dfdx * dt);
            let dk2_du = &k2.dfdx * &k1.dfdu * dt + &k2.dfdu;
            VectorFunctionLinearApproximation {
                f: x + (&k1.f + &k2.f) * (dt / 2.0),
                dfdx: &identity + (&k1.dfdx + dk2_dx) * (dt / 2.0),
                dfdu: (&k1.dfdu + dk2_du) * (dt / 2.0),
            }
        }
        IntegratorType::Rk4 => {
            let k1 = eval(t, x);
            let k2 = eval(t + dt / 2.0, &(x + &k1.f * (dt / 2.0)));
            let k3 = eval(t + dt / 2.0, &(x + &k2.f * (dt / 2.0)));
            let k4 = eval(t + dt, &(x + &k3.f * dt));

            let dk1_dx = k1.dfdx.clone();
            let dk1_du = k1.dfdu.clone();
            let dk2_dx = &k2.dfdx * (&identity + &dk1_dx * (dt / 2.0));
            let dk2_du = &k2.dfdx * &dk1_du * (dt / 2.0) + &k2.dfdu;
            let dk3_dx = &k3.dfdx * (&identity + &dk2_dx * (dt / 2.0));
            let dk3_du = &k3.dfdx * &dk2_du * (dt / 2.0) + &k3.dfdu;
            let dk4_dx = &k4.dfdx * (&identity + &dk3_dx * dt);
            let dk4_du = &k4.dfdx * &dk3_du * dt + &k4.dfdu;

            VectorFunctionLinearApproximation {
                f: x + (&k1.f + &k2.f * 2.0 + &k3.f * 2.0 + &k4.f) * (dt / 6.0),
                dfdx: &identity
                    + (dk1_dx + &dk2_dx * 2.0 + &dk3_dx * 2.0 + dk4_dx) * (dt / 6.0),
                dfdu: (dk1_du + &dk2_du * 2.0 + &dk3_du * 2.0 + dk4_du) * (dt / 6.0),
            }
        }
    }
}

/// Value-only flow discretization used by the line-search evaluations.
pub fn discretize(
    problem: &OptimalControlProblem,
    integrator: IntegratorType,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    u: &Vector,
) -> Vector {
    let precomp = problem.pre_computation.as_ref();
    let flow = |ti: Scalar, xi: &Vector| problem.dynamics.flow_map(ti, xi, u, precomp);
    match integrator {
        IntegratorType::Euler => x + flow(t, x) * dt,
        IntegratorType::Rk2 => {
            let k1 = flow(t, x);
            let k2 = flow(t + dt, &(x + &k1 * dt));
            x + (k1 + k2) * (dt / 2.0)
        }
        IntegratorType::Rk4 => {
            let k1 = flow(t, x);
            let k2 = flow(t + dt / 2.0, &(x + &k1 * (dt / 2.0)));
            let k3 = flow(t + dt / 2.0, &(x + &k2 * (dt / 2.0)));
            let k4 = flow(t + dt, &(x + &k3 * dt));
            x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
        }
    }
}

/// Transcribes one interior shooting interval.
#[allow(clippy::too_many_arguments)]
pub fn setup_intermediate_node(
    problem: &mut OptimalControlProblem,
    integrator: IntegratorType,
    project: bool,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    x_next: &Vector,
    u: &Vector,
) -> NodeTranscription {
    let request = Request::COST
        | Request::SOFT_CONSTRAINT
        | Request::CONSTRAINT
        | Request::DYNAMICS
        | Request::APPROXIMATION;
    problem.pre_computation.request(request, t, x, u);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let mut node = NodeTranscription::default();

    // Dynamics sensitivity and shooting gap.
    node.dynamics = sensitivity_discretization(problem, integrator, t, dt, x, u);
    node.dynamics.f -= x_next;

    // Stage cost: running-cost rate plus soft-penalized inequalities, both
    // scaled to the interval.
    node.cost = cost_eval::collection_quadratic_approximation(
        &problem.cost,
        t,
        x,
        u,
        &problem.target_trajectories,
        precomp,
    );
    let h = constraint_eval::collection_linear_approximation(
        &problem.inequality_constraints,
        t,
        x,
        u,
        precomp,
    );
    if h.num_rows() > 0 {
        node.cost += &problem.soft_constraint_penalty.quadratic_approximation(t, &h);
    }
    node.cost.scale(dt);

    // Equality constraints: state-input terms plus state-only terms padded
    // with an empty input block.
    node.constraints = constraint_eval::collection_linear_approximation(
        &problem.equality_constraints,
        t,
        x,
        u,
        precomp,
    );
    let state_only = constraint_eval::state_collection_linear_approximation(
        &problem.state_equality_constraints,
        t,
        x,
        precomp,
    );
    if state_only.num_rows() > 0 {
        let mut padded = VectorFunctionLinearApproximation::zero(0, x.len(), u.len());
        padded.stack(&VectorFunctionLinearApproximation {
            f: state_only.f.clone(),
            dfdx: state_only.dfdx.clone(),
            dfdu: Matrix::zeros(state_only.num_rows(), u.len()),
        });
        node.constraints.stack(&padded);
    }

    node.performance = intermediate_performance_from(
        problem, t, dt, x, u, &node.dynamics.f, precomp,
    );

    if project && node.constraints.num_rows() > 0 {
        let d_pinv = linalg::pseudo_inverse(&node.constraints.dfdu);
        let pu = linalg::null_space_basis(&node.constraints.dfdu);
        let px = -(&d_pinv * &node.constraints.dfdx);
        let u0 = -(&d_pinv * &node.constraints.f);

        linalg::change_cost_input_variables(&mut node.cost, &pu, &px, &u0);
        linalg::change_dynamics_input_variables(&mut node.dynamics, &pu, &px, &u0);

        node.projection = VectorFunctionLinearApproximation { f: u0, dfdx: px, dfdu: pu };
        node.constraints = VectorFunctionLinearApproximation::zero(0, x.len(), 0);
    }

    node
}

/// Transcribes an event node: the jump linearization and the pre-jump cost.
pub fn setup_event_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    x_next: &Vector,
) -> NodeTranscription {
    let request = Request::COST | Request::DYNAMICS | Request::APPROXIMATION;
    problem.pre_computation.request_pre_jump(request, t, x);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let mut node = NodeTranscription {
        dynamics: problem.dynamics.jump_map_linear_approximation(t, x, precomp),
        cost: cost_eval::state_collection_quadratic_approximation(
            &problem.pre_jump_cost,
            t,
            x,
            &problem.target_trajectories,
            precomp,
        ),
        ..Default::default()
    };
    node.dynamics.f -= x_next;

    node.performance.total_cost = node.cost.f;
    node.performance.state_eq_constraint_ise = node.dynamics.f.norm_squared();
    node.performance.update_merit();

    node.constraints = VectorFunctionLinearApproximation::zero(0, x.len(), 0);
    node.projection = VectorFunctionLinearApproximation::zero(0, x.len(), 0);
    node
}

/// Transcribes the terminal node.
pub fn setup_terminal_node(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> NodeTranscription {
    let request = Request::COST | Request::CONSTRAINT | Request::APPROXIMATION;
    problem.pre_computation.request_final(request, t, x);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let cost = cost_eval::state_collection_quadratic_approximation(
        &problem.final_cost,
        t,
        x,
        &problem.target_trajectories,
        precomp,
    );
    let state_only = constraint_eval::state_collection_linear_approximation(
        &problem.state_equality_constraints,
        t,
        x,
        precomp,
    );

    let mut node = NodeTranscription {
        cost,
        constraints: state_only,
        ..Default::default()
    };
    node.performance.total_cost = node.cost.f;
    node.performance.state_eq_constraint_ise = node.constraints.f.norm_squared();
    node.performance.update_merit();
    node
}

/// Value-only accounting of one interior interval.
pub fn compute_intermediate_performance(
    problem: &mut OptimalControlProblem,
    integrator: IntegratorType,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    x_next: &Vector,
    u: &Vector,
) -> PerformanceIndex {
    let request = Request::COST | Request::SOFT_CONSTRAINT | Request::CONSTRAINT | Request::DYNAMICS;
    problem.pre_computation.request(request, t, x, u);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let gap = discretize(problem, integrator, t, dt, x, u) - x_next;
    intermediate_performance_from(problem, t, dt, x, u, &gap, precomp)
}

/// Value-only accounting of an event node.
pub fn compute_event_performance(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
    x_next: &Vector,
) -> PerformanceIndex {
    let request = Request::COST | Request::DYNAMICS;
    problem.pre_computation.request_pre_jump(request, t, x);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let gap = problem.dynamics.jump_map(t, x, precomp) - x_next;
    let mut performance = PerformanceIndex {
        total_cost: cost_eval::state_collection_value(
            &problem.pre_jump_cost,
            t,
            x,
            &problem.target_trajectories,
            precomp,
        ),
        state_eq_constraint_ise: gap.norm_squared(),
        ..Default::default()
    };
    performance.update_merit();
    performance
}

/// Value-only accounting of the terminal node.
pub fn compute_terminal_performance(
    problem: &mut OptimalControlProblem,
    t: Scalar,
    x: &Vector,
) -> PerformanceIndex {
    let request = Request::COST | Request::CONSTRAINT;
    problem.pre_computation.request_final(request, t, x);
    let problem = &*problem;
    let precomp = problem.pre_computation.as_ref();

    let mut performance = PerformanceIndex {
        total_cost: cost_eval::state_collection_value(
            &problem.final_cost,
            t,
            x,
            &problem.target_trajectories,
            precomp,
        ),
        state_eq_constraint_ise: constraint_eval::state_collection_value(
            &problem.state_equality_constraints,
            t,
            x,
            precomp,
        )
        .norm_squared(),
        ..Default::default()
    };
    performance.update_merit();
    performance
}

#[allow(clippy::too_many_arguments)]
fn intermediate_performance_from(
    problem: &OptimalControlProblem,
    t: Scalar,
    dt: Scalar,
    x: &Vector,
    u: &Vector,
    gap: &Vector,
    precomp: &dyn rocs_core::model::PreComputation,
) -> PerformanceIndex {
    let mut performance = PerformanceIndex::default();
    performance.total_cost = dt
        * cost_eval::collection_value(
            &problem.cost,
            t,
            x,
            u,
            &problem.target_trajectories,
            precomp,
        );
    performance.state_eq_constraint_ise = gap.norm_squared();

    let g = constraint_eval::collection_value(&problem.equality_constraints, t, x, u, precomp);
    let g_state = constraint_eval::state_collection_value(
        &problem.state_equality_constraints,
        t,
        x,
        precomp,
    );
    performance.state_input_eq_constraint_ise = dt * (g.norm_squared() + g_state.norm_squared());

    let h = constraint_eval::collection_value(&problem.inequality_constraints, t, x, u, precomp);
    performance.inequality_constraint_ise =
        dt * h.iter().map(|&hi| hi.min(0.0).powi(2)).sum::<Scalar>();
    performance.inequality_constraint_penalty =
        dt * problem.soft_constraint_penalty.value(t, &h);

    performance.update_merit();
    performance
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocs_core::model::LinearSystemDynamics;
    use approx::assert_relative_eq;

    /// On `dx/dt = a x + b u` the exact discrete map is known; RK4 must be
    /// within discretization-order error of it.
    #[test]
    fn sensitivity_discretization_matches_exact_linear_map() {
        let a = -0.7;
        let b = 0.3;
        let dynamics = LinearSystemDynamics::new(
            Matrix::from_row_slice(1, 1, &[a]),
            Matrix::from_row_slice(1, 1, &[b]),
        );
        let problem = OptimalControlProblem::new(Box::new(dynamics));
        let dt = 0.1;
        let x = Vector::from_vec(vec![2.0]);
        let u = Vector::from_vec(vec![0.5]);

        let exact_ad = (a * dt).exp();
        let exact_bd = (exact_ad - 1.0) / a * b;

        let rk4 = sensitivity_discretization(&problem, IntegratorType::Rk4, 0.0, dt, &x, &u);
        assert_relative_eq!(rk4.dfdx[(0, 0)], exact_ad, epsilon = 1e-7);
        assert_relative_eq!(rk4.dfdu[(0, 0)], exact_bd, epsilon = 1e-6);
        assert_relative_eq!(
            rk4.f[0],
            exact_ad * x[0] + exact_bd * u[0],
            epsilon = 1e-6
        );

        let euler = sensitivity_discretization(&problem, IntegratorType::Euler, 0.0, dt, &x, &u);
        assert_relative_eq!(euler.dfdx[(0, 0)], 1.0 + a * dt, epsilon = 1e-12);

        let rk2 = sensitivity_discretization(&problem, IntegratorType::Rk2, 0.0, dt, &x, &u);
        assert_relative_eq!(rk2.dfdx[(0, 0)], exact_ad, epsilon = 1e-4);
    }

    /// Projection removes the constraint rows and parametrizes the feasible
    /// input set; substituting the particular solution must satisfy the
    /// original constraint.
    #[test]
    fn projection_produces_feasible_parametrization() {
        let dynamics = LinearSystemDynamics::new(Matrix::zeros(2, 2), Matrix::identity(2, 2));
        let mut problem = OptimalControlProblem::new(Box::new(dynamics));
        problem
            .equality_constraints
            .add(
                "sum",
                Box::new(rocs_core::model::LinearStateInputConstraint::new(
                    Vector::from_vec(vec![0.3]),
                    Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
                    Matrix::from_row_slice(1, 2, &[1.0, 1.0]),
                )),
            )
            .unwrap();

        let x = Vector::from_vec(vec![0.2, -0.1]);
        let x_next = Vector::from_vec(vec![0.2, -0.1]);
        let u = Vector::from_vec(vec![0.0, 0.0]);
        let node = setup_intermediate_node(
            &mut problem,
            IntegratorType::Euler,
            true,
            0.0,
            0.1,
            &x,
            &x_next,
            &u,
        );

        assert_eq!(node.constraints.num_rows(), 0);
        assert_eq!(node.projection.dfdu.shape(), (2, 1));
        // e + C x + D (u0) = 0 for dx = 0, dv = 0.
        let residual = 0.3 + 0.2 + node.projection.f[0] + node.projection.f[1];
        assert_relative_eq!(residual, 0.0, epsilon = 1e-9);
    }
}
