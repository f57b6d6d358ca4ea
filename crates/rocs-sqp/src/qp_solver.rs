//! Structured staircase QP back-end
//!
//! Solves the LQ subproblem assembled by the transcription: a backward
//! Riccati factorization over the stage sequence followed by a forward
//! substitution. The factorization is kept so the Riccati feedback gains of
//! the last solve can be extracted for controller synthesis.

use serde::{Deserialize, Serialize};

use rocs_core::linalg;
use rocs_core::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector,
                       VectorFunctionLinearApproximation};

pub use crate::settings::QpSettings;

/// Back-end status. Non-success is fatal for the surrounding `run`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QpStatus {
    Success,
    MaxIter,
    Infeasible,
    NanSolution,
}

/// Stage dimensions of one structured QP.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OcpSize {
    pub num_stages: usize,
    pub state_dims: Vec<usize>,
    pub input_dims: Vec<usize>,
    pub constraint_dims: Vec<usize>,
}

/// Reads the stage dimensions off the assembled LQ data.
pub fn extract_sizes(
    dynamics: &[VectorFunctionLinearApproximation],
    cost: &[ScalarFunctionQuadraticApproximation],
    constraints: Option<&[VectorFunctionLinearApproximation]>,
) -> OcpSize {
    let num_stages = dynamics.len();
    let mut state_dims = Vec::with_capacity(num_stages + 1);
    let mut input_dims = Vec::with_capacity(num_stages);
    for stage in dynamics {
        state_dims.push(stage.dfdx.ncols());
        input_dims.push(stage.dfdu.ncols());
    }
    state_dims.push(cost.last().map_or(0, |c| c.state_dim()));

    let constraint_dims = match constraints {
        Some(blocks) => blocks.iter().map(|b| b.num_rows()).collect(),
        None => vec![0; num_stages + 1],
    };
    OcpSize { num_stages, state_dims, input_dims, constraint_dims }
}

/// Primal solution of one QP solve.
#[derive(Clone, Debug, Default)]
pub struct QpSolution {
    pub delta_x: Vec<Vector>,
    pub delta_u: Vec<Vector>,
    pub status: QpStatus,
}

impl Default for QpStatus {
    fn default() -> Self {
        QpStatus::Success
    }
}

/// Riccati-based solver for staircase-structured QPs.
pub struct StructuredQpSolver {
    settings: QpSettings,
    size: OcpSize,
    feedback: Vec<Matrix>,
}

impl StructuredQpSolver {
    pub fn new(settings: QpSettings) -> Self {
        Self {
            settings,
            size: OcpSize::default(),
            feedback: Vec::new(),
        }
    }

    /// Prepares the workspace for the given stage dimensions.
    pub fn resize(&mut self, size: OcpSize) {
        if size != self.size {
            self.feedback = vec![Matrix::zeros(0, 0); size.num_stages];
            self.size = size;
        }
    }

    /// Feedback gains of the last successful solve, one per stage, in the
    /// same (possibly projected) input coordinates as the supplied data.
    pub fn riccati_feedback(&self) -> &[Matrix] {
        &self.feedback
    }

    /// Solves the structured QP
    /// `min sum_k 1/2 [dx;du]' H_k [dx;du] + g_k' [dx;du]` subject to the
    /// stage dynamics `dx_{k+1} = A_k dx_k + B_k du_k + b_k` and the given
    /// initial deviation. Remaining equality-constraint blocks are folded
    /// into the stage costs with the configured penalty weight.
    pub fn solve(
        &mut self,
        delta_x0: &Vector,
        dynamics: &[VectorFunctionLinearApproximation],
        cost: &[ScalarFunctionQuadraticApproximation],
        constraints: Option<&[VectorFunctionLinearApproximation]>,
    ) -> QpSolution {
        let n = dynamics.len();
        debug_assert_eq!(cost.len(), n + 1);

        // Optional equality blocks become quadratic penalties.
        let stage_cost: Vec<ScalarFunctionQuadraticApproximation> = (0..=n)
            .map(|k| {
                let mut c = cost[k].clone();
                if let Some(blocks) = constraints {
                    if blocks[k].num_rows() > 0 {
                        penalize_equality(&mut c, &blocks[k], self.settings.equality_penalty);
                    }
                }
                c
            })
            .collect();

        // Backward Riccati factorization.
        let mut sm = stage_cost[n].dfdxx.clone();
        let mut sv = stage_cost[n].dfdx.clone();
        let mut gains = vec![Matrix::zeros(0, 0); n];
        let mut feedforward = vec![Vector::zeros(0); n];

        for k in (0..n).rev() {
            let a = &dynamics[k].dfdx;
            let b = &dynamics[k].dfdu;
            let bias = &dynamics[k].f;
            let nu = b.ncols();

            let sv_shifted = &sv + &sm * bias;
            if nu == 0 {
                // Event stage: pure propagation through the jump.
                sv = &stage_cost[k].dfdx + a.transpose() * &sv_shifted;
                sm = &stage_cost[k].dfdxx + a.transpose() * &sm * a;
                symmetrize(&mut sm);
                gains[k] = Matrix::zeros(0, a.ncols());
                feedforward[k] = Vector::zeros(0);
                continue;
            }

            let bt_sm = b.transpose() * &sm;
            let mut hm = &stage_cost[k].dfduu + &bt_sm * b;
            linalg::shift_eigenvalues(&mut hm, self.settings.min_eigenvalue_floor);
            let chol = match hm.cholesky() {
                Some(c) => c,
                None => {
                    return QpSolution {
                        delta_x: Vec::new(),
                        delta_u: Vec::new(),
                        status: QpStatus::Infeasible,
                    }
                }
            };

            let gm = &stage_cost[k].dfdux + &bt_sm * a;
            let gv = &stage_cost[k].dfdu + b.transpose() * &sv_shifted;

            let gain = -chol.solve(&gm);
            let ff = -chol.solve(&gv);

            sm = &stage_cost[k].dfdxx + a.transpose() * &sm * a + gm.transpose() * &gain;
            symmetrize(&mut sm);
            sv = &stage_cost[k].dfdx + a.transpose() * sv_shifted + gm.transpose() * &ff;

            gains[k] = gain;
            feedforward[k] = ff;
        }

        // Forward substitution.
        let mut delta_x = Vec::with_capacity(n + 1);
        let mut delta_u = Vec::with_capacity(n);
        delta_x.push(delta_x0.clone());
        for k in 0..n {
            let du = &feedforward[k] + &gains[k] * &delta_x[k];
            let next =
                &dynamics[k].dfdx * &delta_x[k] + &dynamics[k].dfdu * &du + &dynamics[k].f;
            delta_u.push(du);
            delta_x.push(next);
        }

        let finite = delta_x.iter().all(|v| v.iter().all(|c| c.is_finite()))
            && delta_u.iter().all(|v| v.iter().all(|c| c.is_finite()));
        if !finite {
            return QpSolution {
                delta_x: Vec::new(),
                delta_u: Vec::new(),
                status: QpStatus::NanSolution,
            };
        }

        self.feedback = gains;
        QpSolution { delta_x, delta_u, status: QpStatus::Success }
    }
}

fn penalize_equality(
    cost: &mut ScalarFunctionQuadraticApproximation,
    block: &VectorFunctionLinearApproximation,
    weight: Scalar,
) {
    cost.f += 0.5 * weight * block.f.norm_squared();
    cost.dfdx += block.dfdx.transpose() * &block.f * weight;
    cost.dfdxx += block.dfdx.transpose() * &block.dfdx * weight;
    if block.dfdu.ncols() > 0 {
        cost.dfdu += block.dfdu.transpose() * &block.f * weight;
        cost.dfduu += block.dfdu.transpose() * &block.dfdu * weight;
        cost.dfdux += block.dfdu.transpose() * &block.dfdx * weight;
    }
}

fn symmetrize(m: &mut Matrix) {
    let t = m.transpose();
    *m += t;
    *m *= 0.5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn double_integrator_problem(
        n: usize,
        dt: Scalar,
    ) -> (Vec<VectorFunctionLinearApproximation>, Vec<ScalarFunctionQuadraticApproximation>) {
        let mut dynamics = Vec::with_capacity(n);
        let mut cost = Vec::with_capacity(n + 1);
        for _ in 0..n {
            let mut d = VectorFunctionLinearApproximation::zero(2, 2, 1);
            d.dfdx = Matrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
            d.dfdu = Matrix::from_row_slice(2, 1, &[0.0, dt]);
            dynamics.push(d);

            let mut c = ScalarFunctionQuadraticApproximation::zero(2, 1);
            c.dfdxx = Matrix::identity(2, 2) * dt;
            c.dfduu = Matrix::identity(1, 1) * (0.1 * dt);
            cost.push(c);
        }
        let mut terminal = ScalarFunctionQuadraticApproximation::zero(2, 0);
        terminal.dfdxx = Matrix::identity(2, 2) * 10.0;
        cost.push(terminal);
        (dynamics, cost)
    }

    #[test]
    fn drives_the_double_integrator_toward_the_origin() {
        let (dynamics, cost) = double_integrator_problem(50, 0.05);
        let mut qp = StructuredQpSolver::new(QpSettings::default());
        qp.resize(extract_sizes(&dynamics, &cost, None));

        let dx0 = Vector::from_vec(vec![1.0, 0.0]);
        let solution = qp.solve(&dx0, &dynamics, &cost, None);
        assert_eq!(solution.status, QpStatus::Success);
        assert_eq!(solution.delta_x.len(), 51);
        assert_eq!(solution.delta_u.len(), 50);

        // The optimal deviation contracts toward the origin.
        let terminal_norm = solution.delta_x.last().unwrap().norm();
        assert!(terminal_norm < 0.5, "terminal deviation {terminal_norm}");

        // Feedback gains are available after the solve.
        assert_eq!(qp.riccati_feedback().len(), 50);
        assert!(qp.riccati_feedback()[0].norm() > 0.0);
    }

    #[test]
    fn solution_satisfies_the_stage_dynamics() {
        let (dynamics, cost) = double_integrator_problem(10, 0.1);
        let mut qp = StructuredQpSolver::new(QpSettings::default());
        qp.resize(extract_sizes(&dynamics, &cost, None));

        let dx0 = Vector::from_vec(vec![0.5, -0.5]);
        let solution = qp.solve(&dx0, &dynamics, &cost, None);
        assert_eq!(solution.status, QpStatus::Success);

        for k in 0..10 {
            let propagated = &dynamics[k].dfdx * &solution.delta_x[k]
                + &dynamics[k].dfdu * &solution.delta_u[k]
                + &dynamics[k].f;
            assert_relative_eq!(propagated, solution.delta_x[k + 1], epsilon = 1e-9);
        }
    }

    #[test]
    fn penalized_equality_block_is_enforced() {
        // One-stage problem with du pinned to -dx by a constraint block.
        let mut d = VectorFunctionLinearApproximation::zero(1, 1, 1);
        d.dfdx[(0, 0)] = 1.0;
        d.dfdu[(0, 0)] = 1.0;
        let dynamics = vec![d];

        let mut c0 = ScalarFunctionQuadraticApproximation::zero(1, 1);
        c0.dfduu[(0, 0)] = 1e-3;
        let mut c1 = ScalarFunctionQuadraticApproximation::zero(1, 0);
        c1.dfdxx[(0, 0)] = 1e-3;
        let cost = vec![c0, c1];

        let mut block = VectorFunctionLinearApproximation::zero(1, 1, 1);
        block.dfdx[(0, 0)] = 1.0;
        block.dfdu[(0, 0)] = 1.0;
        let constraints = vec![block, VectorFunctionLinearApproximation::zero(0, 1, 0)];

        let mut qp = StructuredQpSolver::new(QpSettings::default());
        qp.resize(extract_sizes(&dynamics, &cost, Some(&constraints)));
        let solution = qp.solve(
            &Vector::from_vec(vec![1.0]),
            &dynamics,
            &cost,
            Some(&constraints),
        );
        assert_eq!(solution.status, QpStatus::Success);
        assert_relative_eq!(solution.delta_u[0][0], -1.0, epsilon = 1e-3);
    }
}
