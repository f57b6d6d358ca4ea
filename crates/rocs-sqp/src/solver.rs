//! SQP outer loop
//!
//! Per iteration: horizon-sharded LQ transcription, one structured QP
//! solve, then the filter line search. After the loop the primal solution
//! and (optionally) the linear feedback policy are assembled from the last
//! QP factorization.

use std::sync::Mutex;

use log::{debug, info};

use rocs_core::benchmark::{format_breakdown, PhaseTimer};
use rocs_core::controller::{Controller, FeedforwardController, LinearController};
use rocs_core::performance::PerformanceIndex;
use rocs_core::reference::ReferenceManager;
use rocs_core::threading::{StageCounter, WorkerPool, WorkerProblems};
use rocs_core::types::{Matrix, Scalar, Vector};
use rocs_core::{DefaultInitializer, OptimalControlProblem, PrimalSolution, SolverError};

use crate::qp_solver::{extract_sizes, QpSolution, QpStatus, StructuredQpSolver};
use crate::settings::SqpSettings;
use crate::time_discretization::{time_discretization_with_events, AnnotatedTime, TimeTag};
use crate::transcription::{self, NodeTranscription};

#[derive(Default)]
struct Benchmark {
    lq_approximation: PhaseTimer,
    solve_qp: PhaseTimer,
    line_search: PhaseTimer,
    compute_controller: PhaseTimer,
}

struct OcpSubproblemSolution {
    delta_x: Vec<Vector>,
    delta_u: Vec<Vector>,
    armijo_descent_metric: Scalar,
}

/// Multiple-shooting SQP solver.
pub struct SqpSolver {
    settings: SqpSettings,
    pool: WorkerPool,
    problems: WorkerProblems,
    initializer: DefaultInitializer,
    reference_manager: ReferenceManager,
    qp: StructuredQpSolver,

    primal_solution: PrimalSolution,
    performance_history: Vec<PerformanceIndex>,
    total_num_iterations: usize,

    benchmark: Benchmark,
}

impl SqpSolver {
    pub fn new(
        mut settings: SqpSettings,
        problem: OptimalControlProblem,
        initializer: DefaultInitializer,
    ) -> Result<Self, SolverError> {
        settings.validate()?;
        // Projection without equality constraints degenerates to the plain
        // unconstrained subproblem.
        if problem.equality_constraints.is_empty() {
            settings.project_state_input_equality_constraints = false;
        }
        let pool = WorkerPool::new(settings.n_threads)?;
        let problems = WorkerProblems::new(problem, settings.n_threads);
        let qp = StructuredQpSolver::new(settings.qp_settings.clone());

        Ok(Self {
            settings,
            pool,
            problems,
            initializer,
            reference_manager: ReferenceManager::default(),
            qp,
            primal_solution: PrimalSolution::default(),
            performance_history: Vec::new(),
            total_num_iterations: 0,
            benchmark: Benchmark::default(),
        })
    }

    /// Installs the target trajectories and mode-schedule source.
    pub fn set_reference_manager(&mut self, reference_manager: ReferenceManager) {
        self.reference_manager = reference_manager;
    }

    pub fn reference_manager_mut(&mut self) -> &mut ReferenceManager {
        &mut self.reference_manager
    }

    /// Discards the accumulated solution and iteration log.
    pub fn reset(&mut self) {
        self.primal_solution = PrimalSolution::default();
        self.performance_history.clear();
        self.total_num_iterations = 0;
        self.benchmark = Benchmark::default();
    }

    pub fn performance_indices(&self) -> PerformanceIndex {
        self.performance_history.last().copied().unwrap_or_default()
    }

    /// Per-iteration performance log of the last run.
    pub fn iterations_log(&self) -> &[PerformanceIndex] {
        &self.performance_history
    }

    pub fn num_iterations(&self) -> usize {
        self.total_num_iterations
    }

    /// Deep copy of the last solution truncated to `[t_0, final_time]`.
    pub fn primal_solution(&self, final_time: Scalar) -> PrimalSolution {
        self.primal_solution.truncated(final_time)
    }

    /// Feedback gain of the optimized policy at `t`; `None` for a
    /// feedforward policy.
    pub fn linear_feedback_gain(&self, t: Scalar) -> Option<Matrix> {
        self.primal_solution
            .controller
            .as_ref()
            .and_then(|c| c.feedback_gain(t))
    }

    /// Executes up to `sqp_iteration` outer iterations.
    pub fn run(
        &mut self,
        init_time: Scalar,
        init_state: Vector,
        final_time: Scalar,
        partitioning_times: &[Scalar],
    ) -> Result<(), SolverError> {
        if partitioning_times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SolverError::Configuration(
                "partitioning times must be strictly increasing".to_string(),
            ));
        }
        if final_time <= init_time {
            return Err(SolverError::Configuration(format!(
                "empty horizon [{init_time}, {final_time}]"
            )));
        }
        if init_state.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::Configuration(
                "initial state is not finite".to_string(),
            ));
        }

        if self.settings.print_solver_status {
            info!("SQP solver starts from t = {init_time} to t = {final_time}");
        }

        let grid = time_discretization_with_events(
            init_time,
            final_time,
            self.settings.dt,
            &self.reference_manager.mode_schedule().event_times,
        );

        let targets = self.reference_manager.target_trajectories().clone();
        self.problems.set_target_trajectories(&targets);

        let (mut x, mut u) = self.initialize_state_input(&grid, &init_state);
        self.performance_history.clear();

        let mut transcription: Vec<NodeTranscription> = Vec::new();
        for iteration in 0..self.settings.sqp_iteration {
            if self.settings.print_solver_status {
                debug!("SQP iteration {iteration}");
            }

            self.benchmark.lq_approximation.start();
            let (baseline, nodes) = self.setup_quadratic_subproblem(&grid, &init_state, &x, &u)?;
            transcription = nodes;
            if iteration == 0 {
                self.performance_history.push(baseline);
            }
            self.benchmark.lq_approximation.stop();

            self.benchmark.solve_qp.start();
            let delta_x0 = &init_state - &x[0];
            let subproblem = self.solve_subproblem(&delta_x0, &transcription)?;
            self.benchmark.solve_qp.stop();

            self.benchmark.line_search.start();
            let (converged, performance) =
                self.take_step(&grid, &init_state, baseline, &subproblem, &mut x, &mut u);
            self.performance_history.push(performance);
            self.benchmark.line_search.stop();

            self.total_num_iterations += 1;
            if converged {
                break;
            }
        }

        self.benchmark.compute_controller.start();
        self.set_primal_solution(&grid, x, u, &transcription);
        self.benchmark.compute_controller.stop();

        if self.settings.print_solver_status {
            info!("SQP solver terminated: {}", self.performance_indices());
        }
        Ok(())
    }

    // ---- internals ------------------------------------------------------

    /// Initial shooting iterate: the previous solution where it covers the
    /// horizon, the initializer elsewhere.
    fn initialize_state_input(
        &self,
        grid: &[AnnotatedTime],
        init_state: &Vector,
    ) -> (Vec<Vector>, Vec<Vector>) {
        let n = grid.len() - 1;
        let mut x = Vec::with_capacity(n + 1);
        let mut u = Vec::with_capacity(n);
        x.push(init_state.clone());

        let interpolate_till = if self.primal_solution.is_empty() {
            grid[0].time
        } else {
            self.primal_solution.final_time().unwrap()
        };

        let problem = self.problems.lock(0);
        for i in 0..n {
            if grid[i].tag == TimeTag::PreEvent {
                u.push(Vector::zeros(0));
                let jumped = problem.dynamics.jump_map(
                    grid[i].time,
                    &x[i],
                    problem.pre_computation.as_ref(),
                );
                x.push(jumped);
            } else {
                let time = grid[i].time;
                let next_time = grid[i + 1].time;
                let (input, next_state) = if time < interpolate_till {
                    (
                        self.primal_solution.input_at(time),
                        self.primal_solution.state_at(next_time),
                    )
                } else {
                    self.initializer.compute(time, &x[i], next_time)
                };
                u.push(input);
                x.push(next_state);
            }
        }
        (x, u)
    }

    /// Horizon-sharded transcription; one worker claims the terminal node.
    fn setup_quadratic_subproblem(
        &self,
        grid: &[AnnotatedTime],
        init_state: &Vector,
        x: &[Vector],
        u: &[Vector],
    ) -> Result<(PerformanceIndex, Vec<NodeTranscription>), SolverError> {
        let n = grid.len() - 1;
        let project = self.settings.project_state_input_equality_constraints;
        let integrator = self.settings.integrator_type;

        let slots: Vec<Mutex<Option<NodeTranscription>>> =
            (0..=n).map(|_| Mutex::new(None)).collect();
        let partials: Vec<Mutex<PerformanceIndex>> = (0..self.pool.n_threads())
            .map(|_| Mutex::new(PerformanceIndex::default()))
            .collect();
        let counter = StageCounter::new();

        self.pool.run(|worker_id| {
            let mut problem = self.problems.lock(worker_id);
            let mut local = PerformanceIndex::default();
            loop {
                let i = counter.next();
                if i > n {
                    break;
                }
                let node = if i == n {
                    transcription::setup_terminal_node(&mut problem, grid[n].time, &x[n])
                } else if grid[i].tag == TimeTag::PreEvent {
                    transcription::setup_event_node(&mut problem, grid[i].time, &x[i], &x[i + 1])
                } else {
                    let dt = grid[i + 1].time - grid[i].time;
                    transcription::setup_intermediate_node(
                        &mut problem,
                        integrator,
                        project,
                        grid[i].time,
                        dt,
                        &x[i],
                        &x[i + 1],
                        &u[i],
                    )
                };
                local += node.performance;
                *slots[i].lock().unwrap() = Some(node);
            }
            *partials[worker_id].lock().unwrap() = local;
        });

        let nodes: Vec<NodeTranscription> = slots
            .into_iter()
            .map(|s| s.into_inner().unwrap().expect("transcription slot"))
            .collect();

        // Deterministic accumulation order over the fixed worker count.
        let mut performance = PerformanceIndex::default();
        for partial in partials {
            performance += partial.into_inner().unwrap();
        }
        performance.state_eq_constraint_ise += (init_state - &x[0]).norm_squared();
        performance.update_merit();
        Ok((performance, nodes))
    }

    /// Presents the assembled stage data to the QP back-end and maps the
    /// projected input direction back to full coordinates.
    fn solve_subproblem(
        &mut self,
        delta_x0: &Vector,
        nodes: &[NodeTranscription],
    ) -> Result<OcpSubproblemSolution, SolverError> {
        let n = nodes.len() - 1;
        let dynamics: Vec<_> = nodes[..n].iter().map(|d| d.dynamics.clone()).collect();
        let cost: Vec<_> = nodes.iter().map(|d| d.cost.clone()).collect();
        let has_constraints = nodes.iter().any(|d| d.constraints.num_rows() > 0);
        let constraints: Option<Vec<_>> = has_constraints
            .then(|| nodes.iter().map(|d| d.constraints.clone()).collect());

        self.qp
            .resize(extract_sizes(&dynamics, &cost, constraints.as_deref()));
        let QpSolution { delta_x, mut delta_u, status } =
            self.qp
                .solve(delta_x0, &dynamics, &cost, constraints.as_deref());
        if status != QpStatus::Success {
            return Err(SolverError::QpFailure(format!(
                "structured QP returned {status:?}"
            )));
        }

        // Descent metric of the cost gradient along the step, before the
        // projection remap (the gradients live in the same coordinates).
        let mut armijo_descent_metric = 0.0;
        for (k, node) in nodes.iter().enumerate() {
            if node.cost.state_dim() > 0 {
                armijo_descent_metric += node.cost.dfdx.dot(&delta_x[k]);
            }
            if k < n && node.cost.input_dim() > 0 {
                armijo_descent_metric += node.cost.dfdu.dot(&delta_u[k]);
            }
        }

        // Remap `dv` to the full input deviation.
        for (k, node) in nodes[..n].iter().enumerate() {
            if node.projection.f.len() > 0 {
                let remapped = &node.projection.f
                    + &node.projection.dfdx * &delta_x[k]
                    + &node.projection.dfdu * &delta_u[k];
                delta_u[k] = remapped;
            }
        }

        Ok(OcpSubproblemSolution { delta_x, delta_u, armijo_descent_metric })
    }

    /// Value-only performance of a shooting iterate, in parallel.
    fn compute_performance(
        &self,
        grid: &[AnnotatedTime],
        init_state: &Vector,
        x: &[Vector],
        u: &[Vector],
    ) -> PerformanceIndex {
        let n = grid.len() - 1;
        let integrator = self.settings.integrator_type;
        let partials: Vec<Mutex<PerformanceIndex>> = (0..self.pool.n_threads())
            .map(|_| Mutex::new(PerformanceIndex::default()))
            .collect();
        let counter = StageCounter::new();

        self.pool.run(|worker_id| {
            let mut problem = self.problems.lock(worker_id);
            let mut local = PerformanceIndex::default();
            loop {
                let i = counter.next();
                if i > n {
                    break;
                }
                local += if i == n {
                    transcription::compute_terminal_performance(&mut problem, grid[n].time, &x[n])
                } else if grid[i].tag == TimeTag::PreEvent {
                    transcription::compute_event_performance(
                        &mut problem,
                        grid[i].time,
                        &x[i],
                        &x[i + 1],
                    )
                } else {
                    let dt = grid[i + 1].time - grid[i].time;
                    transcription::compute_intermediate_performance(
                        &mut problem,
                        integrator,
                        grid[i].time,
                        dt,
                        &x[i],
                        &x[i + 1],
                        &u[i],
                    )
                };
            }
            *partials[worker_id].lock().unwrap() = local;
        });

        let mut performance = PerformanceIndex::default();
        for partial in partials {
            performance += partial.into_inner().unwrap();
        }
        performance.state_eq_constraint_ise += (init_state - &x[0]).norm_squared();
        performance.update_merit();
        performance
    }

    /// Filter line search. Returns `(converged, accepted performance)`.
    fn take_step(
        &self,
        grid: &[AnnotatedTime],
        init_state: &Vector,
        baseline: PerformanceIndex,
        subproblem: &OcpSubproblemSolution,
        x: &mut Vec<Vector>,
        u: &mut Vec<Vector>,
    ) -> (bool, PerformanceIndex) {
        let s = &self.settings;
        let dx = &subproblem.delta_x;
        let du = &subproblem.delta_u;
        let baseline_violation = baseline.constraint_violation();

        if s.print_linesearch {
            debug!(
                "line search baseline: merit {:.9} violation {:.3e}",
                baseline.merit, baseline_violation
            );
        }

        let delta_u_norm = trajectory_norm(du);
        let delta_x_norm = trajectory_norm(dx);

        let mut alpha = 1.0;
        loop {
            let mut x_new = x.clone();
            let mut u_new = u.clone();
            for i in 0..u_new.len() {
                // Event intervals carry no input.
                if du[i].len() > 0 {
                    u_new[i] += &du[i] * alpha;
                }
            }
            for i in 0..x_new.len() {
                x_new[i] += &dx[i] * alpha;
            }

            let performance = self.compute_performance(grid, init_state, &x_new, &u_new);
            let violation = performance.constraint_violation();

            let step_accepted = if violation > s.g_max {
                false
            } else if violation < s.g_min
                && baseline_violation < s.g_min
                && subproblem.armijo_descent_metric < 0.0
            {
                // Feasible with a descent direction: plain Armijo decrease.
                performance.merit
                    < baseline.merit + s.armijo_factor * alpha * subproblem.armijo_descent_metric
            } else {
                // Filter: progress in merit or in feasibility.
                performance.merit < baseline.merit - s.gamma_c * baseline_violation
                    || violation < (1.0 - s.gamma_c) * baseline_violation
            };

            if s.print_linesearch {
                debug!(
                    "line search: alpha {alpha:.4} merit {:.9} violation {:.3e} -> {}",
                    performance.merit,
                    violation,
                    if step_accepted { "accepted" } else { "rejected" }
                );
            }

            let step_below_tol =
                alpha * delta_u_norm < s.delta_tol && alpha * delta_x_norm < s.delta_tol;

            if step_accepted {
                *x = x_new;
                *u = u_new;
                let improvement_below_tol = (baseline.merit - performance.merit).abs()
                    < s.cost_tol
                    && violation < s.g_min;
                return (step_below_tol || improvement_below_tol, performance);
            }
            if step_below_tol {
                if s.print_linesearch {
                    debug!("line search: step size below tolerance, keeping the baseline");
                }
                return (true, baseline);
            }

            alpha *= s.alpha_decay;
            if alpha < s.alpha_min {
                return (true, baseline);
            }
        }
    }

    /// Assembles the primal solution; with `use_feedback_policy` the QP's
    /// Riccati gains are composed with the constraint projection and turned
    /// into `u = uff(t) + K(t) x`. Pre-event nodes inherit the previous
    /// sample's input and gain; the terminal sample repeats the last one.
    fn set_primal_solution(
        &mut self,
        grid: &[AnnotatedTime],
        x: Vec<Vector>,
        mut u: Vec<Vector>,
        nodes: &[NodeTranscription],
    ) {
        let n = grid.len() - 1;

        for i in 0..n {
            if grid[i].tag == TimeTag::PreEvent && i > 0 {
                u[i] = u[i - 1].clone();
            }
        }

        let controller = if self.settings.use_feedback_policy && !nodes.is_empty() {
            let riccati_gains = self.qp.riccati_feedback();
            let mut uff = u.clone();
            let mut gains: Vec<Matrix> = Vec::with_capacity(n + 1);
            for i in 0..n {
                if grid[i].tag == TimeTag::PreEvent && i > 0 {
                    uff[i] = uff[i - 1].clone();
                    let previous = gains[i - 1].clone();
                    gains.push(previous);
                } else {
                    let gain = if nodes[i].projection.f.len() > 0 {
                        &nodes[i].projection.dfdx
                            + &nodes[i].projection.dfdu * &riccati_gains[i]
                    } else {
                        riccati_gains[i].clone()
                    };
                    uff[i] -= &gain * &x[i];
                    gains.push(gain);
                }
            }
            // Equalize lengths with the terminal sample.
            let last_uff = uff.last().cloned().unwrap_or_else(|| Vector::zeros(0));
            uff.push(last_uff);
            let last_gain = gains.last().cloned().unwrap_or_else(|| Matrix::zeros(0, 0));
            gains.push(last_gain);

            let time_stamp: Vec<Scalar> = grid.iter().map(|t| t.time).collect();
            Some(Controller::LinearFeedback(LinearController {
                delta_bias: vec![Vector::zeros(0); time_stamp.len()],
                time_stamp,
                bias: uff,
                gain: gains,
            }))
        } else {
            None
        };

        let mut input_trajectory = u;
        let last_input = input_trajectory
            .last()
            .cloned()
            .unwrap_or_else(|| Vector::zeros(0));
        input_trajectory.push(last_input);

        let time_trajectory: Vec<Scalar> = grid.iter().map(|t| t.time).collect();
        let post_event_indices: Vec<usize> = grid
            .iter()
            .enumerate()
            .filter(|(_, t)| t.tag == TimeTag::PreEvent)
            .map(|(i, _)| i + 1)
            .collect();

        let controller = controller.or_else(|| {
            Some(Controller::Feedforward(FeedforwardController::new(
                time_trajectory.clone(),
                input_trajectory.clone(),
            )))
        });

        self.primal_solution = PrimalSolution {
            time_trajectory,
            state_trajectory: x,
            input_trajectory,
            post_event_indices,
            mode_schedule: self.reference_manager.mode_schedule().clone(),
            controller,
        };
    }
}

fn trajectory_norm(v: &[Vector]) -> Scalar {
    v.iter().map(|vi| vi.norm_squared()).sum::<Scalar>().sqrt()
}

impl Drop for SqpSolver {
    fn drop(&mut self) {
        if self.settings.print_solver_statistics {
            let breakdown = format_breakdown(
                self.total_num_iterations,
                &[
                    ("LQ approximation", &self.benchmark.lq_approximation),
                    ("solve QP", &self.benchmark.solve_qp),
                    ("line search", &self.benchmark.line_search),
                    ("compute controller", &self.benchmark.compute_controller),
                ],
            );
            if !breakdown.is_empty() {
                info!("SQP {breakdown}");
            }
        }
    }
}
