//! Riccati backward passes
//!
//! Solves the time-varying LQ problem along the nominal rollout. The SLQ
//! variant integrates the continuous-time Riccati equations backward over
//! each rollout interval (piecewise-constant model data); the ILQR variant
//! discretizes each stage and runs the discrete difference equation. Both
//! share the state-input equality-constraint projection and the search
//! strategy's Riccati modification.

use rocs_core::linalg;
use rocs_core::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector};
use rocs_core::SolverError;

use crate::hessian_correction::shift_hessian;
use crate::model_data::ModelData;
use crate::settings::{Algorithm, HessianCorrectionStrategy};

/// Null-space parametrization of the state-input equality constraint
/// `e + C dx + D du = 0`: any feasible input deviation is
/// `du = -range_ff - range_x dx + null_basis dv`.
#[derive(Clone, Debug)]
pub struct ConstraintProjection {
    /// `D⁺ C`
    pub range_x: Matrix,
    /// `D⁺ e`
    pub range_ff: Vector,
    /// Orthonormal basis of `ker D`
    pub null_basis: Matrix,
}

impl ConstraintProjection {
    /// Projection of one stage's constraint block. Without active
    /// constraints the parametrization is the identity on the input space.
    pub fn from_model_data(data: &ModelData) -> Self {
        let nu = data.input_dim;
        let constraint = &data.state_input_eq_constraint;
        if constraint.num_rows() == 0 {
            return Self {
                range_x: Matrix::zeros(nu, data.state_dim),
                range_ff: Vector::zeros(nu),
                null_basis: Matrix::identity(nu, nu),
            };
        }
        let d_pinv = linalg::pseudo_inverse(&constraint.dfdu);
        Self {
            range_x: &d_pinv * &constraint.dfdx,
            range_ff: &d_pinv * &constraint.f,
            null_basis: linalg::null_space_basis(&constraint.dfdu),
        }
    }
}

/// Value function and projected policy along the horizon.
#[derive(Clone, Debug, Default)]
pub struct RiccatiSolution {
    pub time: Vec<Scalar>,
    pub sm: Vec<Matrix>,
    pub sv: Vec<Vector>,
    pub s: Vec<Scalar>,
    /// Feedback gains in the projected input coordinates
    pub projected_gain: Vec<Matrix>,
    /// Feedforward updates in the projected input coordinates
    pub projected_ff: Vec<Vector>,
}

impl RiccatiSolution {
    /// Predicted optimal value at the initial nominal state.
    pub fn expected_cost(&self) -> Scalar {
        self.s.first().copied().unwrap_or(0.0)
    }
}

/// Strategy- and settings-dependent knobs of one backward pass.
#[derive(Clone, Debug)]
pub struct BackwardPassConfig {
    pub algorithm: Algorithm,
    pub correction: HessianCorrectionStrategy,
    /// Minimum-eigenvalue floor used when repairing `H_uu`
    pub correction_floor: Scalar,
    /// Apply the state-cost Schur-complement shift (line-search strategy)
    pub shift_state_cost: bool,
    /// Levenberg-Marquardt Tikhonov multiple (zero under line search)
    pub riccati_multiple: Scalar,
    /// Continuous-variant substeps per rollout interval
    pub substeps: usize,
    pub check_numerics: bool,
}

struct ProjectedStage {
    a: Matrix,
    b: Matrix,
    cost: ScalarFunctionQuadraticApproximation,
}

fn project_stage(data: &ModelData, projection: &ConstraintProjection) -> ProjectedStage {
    let px = -&projection.range_x;
    let u0 = -&projection.range_ff;

    let mut cost = data.cost.clone();
    linalg::change_cost_input_variables(&mut cost, &projection.null_basis, &px, &u0);

    let mut dynamics = data.dynamics.clone();
    linalg::change_dynamics_input_variables(&mut dynamics, &projection.null_basis, &px, &u0);

    ProjectedStage {
        a: dynamics.dfdx,
        b: dynamics.dfdu,
        cost,
    }
}

/// Solves the sequential Riccati equations backward along the horizon.
///
/// `model_data[k]` is the interior approximation at sample `k`;
/// `event_data[e]` the jump/pre-jump approximation for the event whose
/// post-event sample index is `post_event_indices[e]`. The heuristics
/// quadratic seeds the terminal value.
pub fn backward_pass(
    times: &[Scalar],
    model_data: &[ModelData],
    event_data: &[ModelData],
    post_event_indices: &[usize],
    projections: &[ConstraintProjection],
    heuristics: &ScalarFunctionQuadraticApproximation,
    config: &BackwardPassConfig,
) -> Result<RiccatiSolution, SolverError> {
    let n = times.len();
    assert_eq!(model_data.len(), n);
    assert_eq!(projections.len(), n);
    if n == 0 {
        return Ok(RiccatiSolution::default());
    }

    let mut solution = RiccatiSolution {
        time: times.to_vec(),
        sm: vec![Matrix::zeros(0, 0); n],
        sv: vec![Vector::zeros(0); n],
        s: vec![0.0; n],
        projected_gain: vec![Matrix::zeros(0, 0); n],
        projected_ff: vec![Vector::zeros(0); n],
    };

    // Terminal condition from the heuristics quadratic.
    solution.sm[n - 1] = heuristics.dfdxx.clone();
    solution.sv[n - 1] = heuristics.dfdx.clone();
    solution.s[n - 1] = heuristics.f;
    let terminal_stage = project_stage(&model_data[n - 1], &projections[n - 1]);
    let (k_t, l_t) = stage_policy(
        &terminal_stage,
        &solution.sm[n - 1],
        &solution.sv[n - 1],
        config,
    )?;
    solution.projected_gain[n - 1] = k_t;
    solution.projected_ff[n - 1] = l_t;

    for k in (0..n - 1).rev() {
        let is_pre_event = post_event_indices.contains(&(k + 1));
        if is_pre_event {
            // Transversality across the jump: propagate the value function
            // through the event linearization and charge the pre-jump cost.
            let e = post_event_indices
                .iter()
                .position(|&p| p == k + 1)
                .expect("event index");
            let event = &event_data[e];
            let g = &event.dynamics.dfdx;
            solution.sm[k] = g.transpose() * &solution.sm[k + 1] * g + &event.cost.dfdxx;
            solution.sv[k] = g.transpose() * &solution.sv[k + 1] + &event.cost.dfdx;
            solution.s[k] = solution.s[k + 1] + event.cost.f;
            symmetrize(&mut solution.sm[k]);
        } else {
            let dt = times[k + 1] - times[k];
            let stage = project_stage(&model_data[k], &projections[k]);
            match config.algorithm {
                Algorithm::Ilqr => {
                    let step = discrete_step(
                        &stage,
                        dt,
                        &solution.sm[k + 1],
                        &solution.sv[k + 1],
                        solution.s[k + 1],
                        config,
                    )?;
                    solution.sm[k] = step.sm;
                    solution.sv[k] = step.sv;
                    solution.s[k] = step.s;
                    solution.projected_gain[k] = step.gain;
                    solution.projected_ff[k] = step.ff;
                    // The discrete recursion already yields the stage policy.
                    check_value_function(&solution, k, times[k], config)?;
                    continue;
                }
                Algorithm::Slq => {
                    let (sm, sv, s) = continuous_step(
                        &stage,
                        dt,
                        &solution.sm[k + 1],
                        &solution.sv[k + 1],
                        solution.s[k + 1],
                        config,
                    )?;
                    solution.sm[k] = sm;
                    solution.sv[k] = sv;
                    solution.s[k] = s;
                    let (gain, ff) =
                        stage_policy(&stage, &solution.sm[k], &solution.sv[k], config)?;
                    solution.projected_gain[k] = gain;
                    solution.projected_ff[k] = ff;
                    check_value_function(&solution, k, times[k], config)?;
                    continue;
                }
            }
        }

        // Pre-event node: policy from the interior stage data and the
        // pre-jump value function.
        let stage = project_stage(&model_data[k], &projections[k]);
        let (gain, ff) = stage_policy(&stage, &solution.sm[k], &solution.sv[k], config)?;
        solution.projected_gain[k] = gain;
        solution.projected_ff[k] = ff;

        check_value_function(&solution, k, times[k], config)?;
    }

    Ok(solution)
}

struct DiscreteStep {
    sm: Matrix,
    sv: Vector,
    s: Scalar,
    gain: Matrix,
    ff: Vector,
}

/// One step of the discrete-time Riccati difference equation on the
/// Euler-discretized stage.
fn discrete_step(
    stage: &ProjectedStage,
    dt: Scalar,
    sm_next: &Matrix,
    sv_next: &Vector,
    s_next: Scalar,
    config: &BackwardPassConfig,
) -> Result<DiscreteStep, SolverError> {
    let nx = stage.a.nrows();
    let a_d = Matrix::identity(nx, nx) + &stage.a * dt;
    let b_d = &stage.b * dt;

    let mut cost_d = stage.cost.clone();
    cost_d.scale(dt);
    if config.shift_state_cost {
        apply_state_cost_shift(&mut cost_d, config);
    }

    let bt_sm = b_d.transpose() * sm_next;
    let mut hm = &cost_d.dfduu + &bt_sm * &b_d;
    if config.riccati_multiple > 0.0 {
        hm += b_d.transpose() * &b_d * config.riccati_multiple;
    }
    shift_hessian(config.correction, &mut hm, config.correction_floor);
    let hm_chol = hm.clone().cholesky().ok_or_else(|| {
        SolverError::NumericalInstability(
            "projected control Hessian is not positive definite".to_string(),
        )
    })?;

    let mut gm = &cost_d.dfdux + &bt_sm * &a_d;
    if config.riccati_multiple > 0.0 {
        gm += b_d.transpose() * &a_d * config.riccati_multiple;
    }
    let gv = &cost_d.dfdu + b_d.transpose() * sv_next;

    let gain = -hm_chol.solve(&gm);
    let ff = -hm_chol.solve(&gv);

    let mut sm = &cost_d.dfdxx + a_d.transpose() * sm_next * &a_d + gm.transpose() * &gain;
    symmetrize(&mut sm);
    let sv = &cost_d.dfdx + a_d.transpose() * sv_next + gm.transpose() * &ff;
    let s = s_next + cost_d.f + 0.5 * gv.dot(&ff);

    Ok(DiscreteStep { sm, sv, s, gain, ff })
}

/// Integrates the continuous-time Riccati equations backward over one
/// interval with piecewise-constant stage data (classic RK4 in time-to-go).
fn continuous_step(
    stage: &ProjectedStage,
    dt: Scalar,
    sm_next: &Matrix,
    sv_next: &Vector,
    s_next: Scalar,
    config: &BackwardPassConfig,
) -> Result<(Matrix, Vector, Scalar), SolverError> {
    let mut cost = stage.cost.clone();
    if config.shift_state_cost {
        apply_state_cost_shift(&mut cost, config);
    }

    let mut hm = cost.dfduu.clone();
    if config.riccati_multiple > 0.0 {
        hm += stage.b.transpose() * &stage.b * config.riccati_multiple;
    }
    shift_hessian(config.correction, &mut hm, config.correction_floor);
    let hm_chol = hm.cholesky().ok_or_else(|| {
        SolverError::NumericalInstability(
            "projected control Hessian is not positive definite".to_string(),
        )
    })?;

    // d/dτ in time-to-go τ: the classic Riccati drift with the strategy's
    // Tikhonov term folded into the cross and input blocks.
    let derivative = |sm: &Matrix, sv: &Vector| -> (Matrix, Vector, Scalar) {
        let mut g = &cost.dfdux + stage.b.transpose() * sm;
        if config.riccati_multiple > 0.0 {
            g += stage.b.transpose() * &stage.a * config.riccati_multiple;
        }
        let gv = &cost.dfdu + stage.b.transpose() * sv;
        let hinv_g = hm_chol.solve(&g);
        let hinv_gv = hm_chol.solve(&gv);

        let mut dsm =
            &cost.dfdxx + stage.a.transpose() * sm + sm * &stage.a - g.transpose() * &hinv_g;
        symmetrize(&mut dsm);
        let dsv = &cost.dfdx + stage.a.transpose() * sv - g.transpose() * &hinv_gv;
        let ds = cost.f - 0.5 * gv.dot(&hinv_gv);
        (dsm, dsv, ds)
    };

    let substeps = config.substeps.max(1);
    let h = dt / substeps as Scalar;
    let mut sm = sm_next.clone();
    let mut sv = sv_next.clone();
    let mut s = s_next;
    for _ in 0..substeps {
        let (k1m, k1v, k1s) = derivative(&sm, &sv);
        let (k2m, k2v, k2s) = derivative(&(&sm + &k1m * (h / 2.0)), &(&sv + &k1v * (h / 2.0)));
        let (k3m, k3v, k3s) = derivative(&(&sm + &k2m * (h / 2.0)), &(&sv + &k2v * (h / 2.0)));
        let (k4m, k4v, k4s) = derivative(&(&sm + &k3m * h), &(&sv + &k3v * h));
        sm += (k1m + k2m * 2.0 + k3m * 2.0 + k4m) * (h / 6.0);
        sv += (k1v + k2v * 2.0 + k3v * 2.0 + k4v) * (h / 6.0);
        s += (k1s + 2.0 * k2s + 2.0 * k3s + k4s) * (h / 6.0);
        symmetrize(&mut sm);
    }

    Ok((sm, sv, s))
}

/// Policy at a node from its value function: `dv = ff + gain dx` in the
/// projected input coordinates.
fn stage_policy(
    stage: &ProjectedStage,
    sm: &Matrix,
    sv: &Vector,
    config: &BackwardPassConfig,
) -> Result<(Matrix, Vector), SolverError> {
    let mut hm = stage.cost.dfduu.clone();
    if config.riccati_multiple > 0.0 {
        hm += stage.b.transpose() * &stage.b * config.riccati_multiple;
    }
    shift_hessian(config.correction, &mut hm, config.correction_floor);
    let hm_chol = hm.cholesky().ok_or_else(|| {
        SolverError::NumericalInstability(
            "projected control Hessian is not positive definite".to_string(),
        )
    })?;

    let mut g = &stage.cost.dfdux + stage.b.transpose() * sm;
    if config.riccati_multiple > 0.0 {
        g += stage.b.transpose() * &stage.a * config.riccati_multiple;
    }
    let gv = &stage.cost.dfdu + stage.b.transpose() * sv;
    Ok((-hm_chol.solve(&g), -hm_chol.solve(&gv)))
}

/// Line-search Riccati modification: shifts the Schur complement of the
/// state cost so the drift term stays positive semi-definite.
fn apply_state_cost_shift(
    cost: &mut ScalarFunctionQuadraticApproximation,
    config: &BackwardPassConfig,
) {
    if cost.dfduu.nrows() == 0 {
        let mut shifted = cost.dfdxx.clone();
        shift_hessian(config.correction, &mut shifted, config.correction_floor);
        cost.dfdxx = shifted;
        return;
    }
    let mut huu = cost.dfduu.clone();
    shift_hessian(config.correction, &mut huu, config.correction_floor);
    if let Some(chol) = huu.cholesky() {
        let schur = &cost.dfdxx - cost.dfdux.transpose() * chol.solve(&cost.dfdux);
        let mut shifted = schur.clone();
        shift_hessian(config.correction, &mut shifted, config.correction_floor);
        cost.dfdxx += shifted - schur;
    }
}

fn check_value_function(
    solution: &RiccatiSolution,
    k: usize,
    time: Scalar,
    config: &BackwardPassConfig,
) -> Result<(), SolverError> {
    if !config.check_numerics {
        return Ok(());
    }
    if solution.sm[k].iter().any(|v| !v.is_finite())
        || solution.sv[k].iter().any(|v| !v.is_finite())
        || !solution.s[k].is_finite()
    {
        return Err(SolverError::NumericalInstability(format!(
            "Riccati solution is not finite at time {time:.6}"
        )));
    }
    Ok(())
}

fn symmetrize(m: &mut Matrix) {
    let t = m.transpose();
    *m += t;
    *m *= 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocs_core::types::VectorFunctionLinearApproximation;

    fn scalar_stage(q: Scalar, r: Scalar, a: Scalar, b: Scalar) -> ModelData {
        let mut data = ModelData {
            time: 0.0,
            state_dim: 1,
            input_dim: 1,
            dynamics: VectorFunctionLinearApproximation::zero(1, 1, 1),
            dynamics_bias: Vector::zeros(1),
            cost: ScalarFunctionQuadraticApproximation::zero(1, 1),
            state_eq_constraint: VectorFunctionLinearApproximation::zero(0, 1, 0),
            state_input_eq_constraint: VectorFunctionLinearApproximation::zero(0, 1, 1),
            ineq_constraint: VectorFunctionLinearApproximation::zero(0, 1, 1),
        };
        data.dynamics.dfdx[(0, 0)] = a;
        data.dynamics.dfdu[(0, 0)] = b;
        data.cost.dfdxx[(0, 0)] = q;
        data.cost.dfduu[(0, 0)] = r;
        data
    }

    fn config(algorithm: Algorithm) -> BackwardPassConfig {
        BackwardPassConfig {
            algorithm,
            correction: HessianCorrectionStrategy::EigenvalueModification,
            correction_floor: 1e-9,
            shift_state_cost: false,
            riccati_multiple: 0.0,
            substeps: 1,
            check_numerics: true,
        }
    }

    /// Scalar LQR with a = 0, b = 1, q = r = 1: the stationary algebraic
    /// solution is S = 1 and K = -1. A long horizon must approach it.
    #[test]
    fn backward_pass_approaches_algebraic_riccati_solution() {
        let n = 2001;
        let dt = 5e-3;
        let times: Vec<Scalar> = (0..n).map(|k| k as Scalar * dt).collect();
        let model_data: Vec<ModelData> =
            (0..n).map(|_| scalar_stage(1.0, 1.0, 0.0, 1.0)).collect();
        let projections: Vec<ConstraintProjection> = model_data
            .iter()
            .map(ConstraintProjection::from_model_data)
            .collect();
        let heuristics = ScalarFunctionQuadraticApproximation::zero(1, 0);

        for algorithm in [Algorithm::Slq, Algorithm::Ilqr] {
            let solution = backward_pass(
                &times,
                &model_data,
                &[],
                &[],
                &projections,
                &heuristics,
                &config(algorithm),
            )
            .unwrap();
            let s0 = solution.sm[0][(0, 0)];
            assert!(
                (s0 - 1.0).abs() < 1e-2,
                "{}: S(0) = {s0}, expected ~1",
                algorithm.name()
            );
            let k0 = solution.projected_gain[0][(0, 0)];
            assert!(
                (k0 + 1.0).abs() < 2e-2,
                "{}: K(0) = {k0}, expected ~-1",
                algorithm.name()
            );
        }
    }

    /// A fully constrained input (D = I) leaves no free direction: the
    /// projected policy is empty and the value function follows the
    /// closed-loop dynamics.
    #[test]
    fn full_rank_constraint_empties_the_null_space() {
        let mut data = scalar_stage(1.0, 1.0, 0.0, 1.0);
        data.state_input_eq_constraint = VectorFunctionLinearApproximation::zero(1, 1, 1);
        data.state_input_eq_constraint.dfdu[(0, 0)] = 1.0;
        let projection = ConstraintProjection::from_model_data(&data);
        assert_eq!(projection.null_basis.shape(), (1, 0));
    }
}
