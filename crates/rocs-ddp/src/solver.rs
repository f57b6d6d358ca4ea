//! DDP outer loop
//!
//! Per iteration: forward rollout of the current policy, linear-quadratic
//! approximation along the nominal (horizon-sharded across the worker
//! pool), Riccati backward pass, controller update, then a search-strategy
//! step and the convergence test.

use std::sync::Mutex;

use log::{debug, info, warn};

use rocs_core::benchmark::{format_breakdown, PhaseTimer};
use rocs_core::controller::{Controller, FeedforwardController, LinearController};
use rocs_core::performance::PerformanceIndex;
use rocs_core::reference::{ModeSchedule, ReferenceManager};
use rocs_core::rollout::TimeTriggeredRollout;
use rocs_core::threading::{StageCounter, WorkerPool, WorkerProblems};
use rocs_core::types::{Matrix, Scalar, ScalarFunctionQuadraticApproximation, Vector};
use rocs_core::{misc, DefaultInitializer, OptimalControlProblem, PrimalSolution, SolverError};

use crate::hessian_correction::shift_hessian;
use crate::model_data::{augment_cost, evaluate_rollout_performance, LinearQuadraticApproximator,
                        ModelData};
use crate::riccati::{backward_pass, BackwardPassConfig, ConstraintProjection, RiccatiSolution};
use crate::search::{ConstraintPenaltyCoefficients, LevenbergMarquardtStrategy,
                    LineSearchStrategy, Nominal, SearchContext, SearchStrategy, StepOutcome};
use crate::settings::{DdpSettings, SearchStrategyKind};

#[derive(Default)]
struct Benchmark {
    initialization: PhaseTimer,
    lq_approximation: PhaseTimer,
    backward_pass: PhaseTimer,
    compute_controller: PhaseTimer,
    search_strategy: PhaseTimer,
}

impl Benchmark {
    fn reset(&mut self) {
        self.initialization.reset();
        self.lq_approximation.reset();
        self.backward_pass.reset();
        self.compute_controller.reset();
        self.search_strategy.reset();
    }
}

/// DDP solver covering the SLQ and ILQR variants.
pub struct DdpSolver {
    settings: DdpSettings,
    rollout: TimeTriggeredRollout,
    pool: WorkerPool,
    problems: WorkerProblems,
    initializer: DefaultInitializer,
    reference_manager: ReferenceManager,
    strategy: SearchStrategy,
    penalty_coefficients: ConstraintPenaltyCoefficients,

    nominal: Nominal,
    model_data: Vec<ModelData>,
    event_data: Vec<ModelData>,
    projections: Vec<ConstraintProjection>,
    riccati: RiccatiSolution,
    heuristics: ScalarFunctionQuadraticApproximation,

    performance_history: Vec<PerformanceIndex>,
    total_num_iterations: usize,
    converged: bool,

    init_time: Scalar,
    final_time: Scalar,

    benchmark: Benchmark,
}

impl DdpSolver {
    pub fn new(
        settings: DdpSettings,
        problem: OptimalControlProblem,
        initializer: DefaultInitializer,
    ) -> Result<Self, SolverError> {
        settings.validate()?;
        let pool = WorkerPool::new(settings.n_threads)?;
        let problems = WorkerProblems::new(problem, settings.n_threads);
        let strategy = match settings.strategy {
            SearchStrategyKind::LineSearch => {
                SearchStrategy::LineSearch(LineSearchStrategy::new(&settings))
            }
            SearchStrategyKind::LevenbergMarquardt => {
                SearchStrategy::LevenbergMarquardt(LevenbergMarquardtStrategy::new(&settings))
            }
        };
        let penalty_coefficients = ConstraintPenaltyCoefficients::new(&settings);
        let rollout = TimeTriggeredRollout::new(settings.rollout.clone());

        Ok(Self {
            settings,
            rollout,
            pool,
            problems,
            initializer,
            reference_manager: ReferenceManager::default(),
            strategy,
            penalty_coefficients,
            nominal: Nominal::default(),
            model_data: Vec::new(),
            event_data: Vec::new(),
            projections: Vec::new(),
            riccati: RiccatiSolution::default(),
            heuristics: ScalarFunctionQuadraticApproximation::default(),
            performance_history: Vec::new(),
            total_num_iterations: 0,
            converged: false,
            init_time: 0.0,
            final_time: 0.0,
            benchmark: Benchmark::default(),
        })
    }

    /// Installs the target trajectories and mode-schedule source.
    pub fn set_reference_manager(&mut self, reference_manager: ReferenceManager) {
        self.reference_manager = reference_manager;
    }

    pub fn reference_manager(&self) -> &ReferenceManager {
        &self.reference_manager
    }

    pub fn reference_manager_mut(&mut self) -> &mut ReferenceManager {
        &mut self.reference_manager
    }

    /// Discards the accumulated solution and iteration log.
    pub fn reset(&mut self) {
        self.nominal = Nominal::default();
        self.model_data.clear();
        self.event_data.clear();
        self.projections.clear();
        self.riccati = RiccatiSolution::default();
        self.performance_history.clear();
        self.total_num_iterations = 0;
        self.converged = false;
        self.strategy.reset();
        self.penalty_coefficients = ConstraintPenaltyCoefficients::new(&self.settings);
        self.benchmark.reset();
    }

    pub fn num_iterations(&self) -> usize {
        self.total_num_iterations
    }

    /// Whether the last run met its tolerances (as opposed to stopping at
    /// the iteration cap or after a step failure).
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn performance_indices(&self) -> PerformanceIndex {
        self.nominal.performance
    }

    /// Per-iteration performance log of the last run.
    pub fn iterations_log(&self) -> &[PerformanceIndex] {
        &self.performance_history
    }

    /// Executes to convergence or the iteration cap.
    pub fn run(
        &mut self,
        init_time: Scalar,
        init_state: Vector,
        final_time: Scalar,
        partitioning_times: &[Scalar],
    ) -> Result<(), SolverError> {
        self.run_with_controller(init_time, init_state, final_time, partitioning_times, None)
    }

    /// As [`run`](Self::run), warm-started from the supplied controller
    /// instead of the internally cached one.
    pub fn run_with_controller(
        &mut self,
        init_time: Scalar,
        init_state: Vector,
        final_time: Scalar,
        partitioning_times: &[Scalar],
        warm_start: Option<&LinearController>,
    ) -> Result<(), SolverError> {
        if partitioning_times.is_empty() {
            return Err(SolverError::Configuration(
                "there should be at least one time partition".to_string(),
            ));
        }
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
            return Err(SolverError::Configuration(format!(
                "initial state is not finite at time {init_time}"
            )));
        }

        info!(
            "{} solver starts from t = {init_time} to t = {final_time}",
            self.settings.algorithm.name()
        );

        if let Some(controller) = warm_start {
            self.nominal.controller = controller.clone();
        }

        let targets = self.reference_manager.target_trajectories().clone();
        self.problems.set_target_trajectories(&targets);
        let mode_schedule = self.reference_manager.mode_schedule().clone();

        self.init_time = init_time;
        self.final_time = final_time;
        self.performance_history.clear();
        self.converged = false;
        let mut unreliable_increment = self.nominal.controller.is_empty();

        // Initial rollout, approximation, backward pass and controller.
        self.benchmark.initialization.start();
        self.rollout_nominal(&init_state, &mode_schedule)?;
        self.benchmark.initialization.stop();
        self.approximate_and_solve(&mode_schedule)?;

        let mut iterations = 1usize;
        self.total_num_iterations += 1;

        while iterations < self.settings.max_num_iterations {
            debug!("iteration {iterations}: {}", self.nominal.performance);
            self.performance_history.push(self.nominal.performance);

            let cached = self.nominal.clone();
            let outcome = self.run_search(&init_state, &mode_schedule, unreliable_increment)?;
            match outcome {
                StepOutcome::Accepted => {}
                StepOutcome::Rejected => {
                    // Keep the previous iterate; the raised Riccati multiple
                    // reshapes the next backward pass.
                    self.nominal = cached;
                }
                StepOutcome::Abandoned => {
                    warn!("search strategy abandoned the step; returning the last accepted iterate");
                    self.nominal = cached;
                    break;
                }
            }

            self.penalty_coefficients
                .update(&self.nominal.performance, &self.settings);
            self.approximate_and_solve(&mode_schedule)?;

            iterations += 1;
            self.total_num_iterations += 1;

            let previous = *self.performance_history.last().unwrap();
            let (converged, convergence_info) = self.strategy.check_convergence(
                unreliable_increment,
                &previous,
                &self.nominal.performance,
            );
            unreliable_increment = false;
            if converged {
                info!("solver terminated: {convergence_info}");
                self.converged = true;
                break;
            }
        }

        // Land the trajectories on the latest policy update.
        self.performance_history.push(self.nominal.performance);
        let cached = self.nominal.clone();
        if self.run_search(&init_state, &mode_schedule, unreliable_increment)?
            != StepOutcome::Accepted
        {
            self.nominal = cached;
        }
        self.performance_history.push(self.nominal.performance);

        if !self.converged && iterations >= self.settings.max_num_iterations {
            info!(
                "solver stopped after reaching the iteration cap of {}",
                self.settings.max_num_iterations
            );
        }
        debug!("final: {}", self.nominal.performance);
        Ok(())
    }

    /// Deep copy of the last accepted solution truncated to
    /// `[t_0, final_time]`.
    pub fn primal_solution(&self, final_time: Scalar) -> PrimalSolution {
        let rollout = &self.nominal.rollout;
        let keep = rollout
            .time_trajectory
            .partition_point(|&t| t <= final_time + misc::WEAK_EPSILON);

        let time_trajectory = rollout.time_trajectory[..keep].to_vec();
        let state_trajectory = rollout.state_trajectory[..keep].to_vec();
        let input_trajectory = rollout.input_trajectory[..keep].to_vec();
        let post_event_indices: Vec<usize> = rollout
            .post_event_indices
            .iter()
            .copied()
            .filter(|&i| i < keep)
            .collect();

        let controller = if self.settings.use_feedback_policy {
            let ctrl = &self.nominal.controller;
            let keep_ctrl = ctrl
                .time_stamp
                .partition_point(|&t| t <= final_time + misc::WEAK_EPSILON);
            Controller::LinearFeedback(LinearController {
                time_stamp: ctrl.time_stamp[..keep_ctrl].to_vec(),
                bias: ctrl.bias[..keep_ctrl].to_vec(),
                gain: ctrl.gain[..keep_ctrl].to_vec(),
                delta_bias: vec![Vector::zeros(0); keep_ctrl],
            })
        } else {
            Controller::Feedforward(FeedforwardController::new(
                time_trajectory.clone(),
                input_trajectory.clone(),
            ))
        };

        PrimalSolution {
            time_trajectory,
            state_trajectory,
            input_trajectory,
            post_event_indices,
            mode_schedule: self.reference_manager.mode_schedule().clone(),
            controller: Some(controller),
        }
    }

    /// Value-function quadratic interpolated at `t` and re-centered around
    /// the query state.
    pub fn value_function(&self, t: Scalar, state: &Vector) -> ScalarFunctionQuadraticApproximation {
        let mut value = ScalarFunctionQuadraticApproximation::zero(state.len(), 0);
        if self.riccati.time.is_empty() {
            return value;
        }
        value.dfdxx = misc::interpolate_matrix(&self.riccati.time, &self.riccati.sm, t);
        value.dfdx = misc::interpolate_vector(&self.riccati.time, &self.riccati.sv, t);
        value.f = misc::interpolate_scalar(&self.riccati.time, &self.riccati.s, t);

        let x_nominal = misc::interpolate_vector(
            &self.nominal.rollout.time_trajectory,
            &self.nominal.rollout.state_trajectory,
            t,
        );
        let dx = state - x_nominal;
        let sm_dx = &value.dfdxx * &dx;
        value.f += dx.dot(&(&sm_dx * 0.5 + &value.dfdx));
        value.dfdx += sm_dx;
        value
    }

    /// Feedback gain of the optimized linear policy at `t`; meaningful only
    /// with `use_feedback_policy`.
    pub fn linear_feedback_gain(&self, t: Scalar) -> Matrix {
        self.nominal.controller.feedback_gain(t)
    }

    // ---- internals ------------------------------------------------------

    /// Forward rollout of the current policy (or the initializer when no
    /// policy exists yet), with cost/constraint accounting.
    fn rollout_nominal(
        &mut self,
        init_state: &Vector,
        mode_schedule: &ModeSchedule,
    ) -> Result<(), SolverError> {
        let policy = if self.nominal.controller.is_empty() {
            let (u0, _) = self
                .initializer
                .compute(self.init_time, init_state, self.final_time);
            Controller::Feedforward(FeedforwardController::new(
                vec![self.init_time, self.final_time],
                vec![u0.clone(), u0],
            ))
        } else {
            Controller::LinearFeedback(self.nominal.controller.clone())
        };

        let mut problem = self.problems.lock(0);
        let output = self
            .rollout
            .run(
                problem.dynamics.as_ref(),
                problem.pre_computation.as_ref(),
                self.init_time,
                init_state,
                self.final_time,
                &policy,
                mode_schedule,
            )
            .map_err(|e| {
                SolverError::IntegrationFailure(format!(
                    "initial policy does not generate a stable rollout: {e}"
                ))
            })?;
        let performance = evaluate_rollout_performance(&mut problem, &output)?;
        drop(problem);

        self.nominal.rollout = output;
        self.nominal.performance = performance;
        Ok(())
    }

    /// LQ approximation, backward pass and controller update around the
    /// current nominal.
    fn approximate_and_solve(&mut self, _mode_schedule: &ModeSchedule) -> Result<(), SolverError> {
        self.benchmark.lq_approximation.start();
        self.approximate_problem()?;
        self.benchmark.lq_approximation.stop();

        self.benchmark.backward_pass.start();
        self.solve_riccati()?;
        self.benchmark.backward_pass.stop();

        self.benchmark.compute_controller.start();
        self.calculate_controller()?;
        self.benchmark.compute_controller.stop();
        Ok(())
    }

    /// Horizon-sharded LQ approximation: every sample is claimed by exactly
    /// one worker through the atomic stage counter; each worker evaluates
    /// on its own problem clone.
    fn approximate_problem(&mut self) -> Result<(), SolverError> {
        let rollout = &self.nominal.rollout;
        let n = rollout.len();
        let state_eq_coeff = self.penalty_coefficients.state_eq_coeff;
        let check = self.settings.check_numerical_stability;
        let precompute_projections = self.settings.pre_compute_riccati_terms;

        let slots: Vec<Mutex<Option<ModelData>>> = (0..n).map(|_| Mutex::new(None)).collect();
        let projection_slots: Vec<Mutex<Option<ConstraintProjection>>> =
            (0..n).map(|_| Mutex::new(None)).collect();
        let counter = StageCounter::new();
        let first_error: Mutex<Option<SolverError>> = Mutex::new(None);

        self.pool.run(|worker_id| {
            let mut problem = self.problems.lock(worker_id);
            loop {
                let k = counter.next();
                if k >= n || first_error.lock().unwrap().is_some() {
                    break;
                }
                let t = rollout.time_trajectory[k];
                let x = &rollout.state_trajectory[k];
                let u = &rollout.input_trajectory[k];

                let mut approximator = LinearQuadraticApproximator::new(&mut problem, check);
                match approximator.approximate(t, x, u) {
                    Ok(mut data) => {
                        augment_cost(&mut data, state_eq_coeff, &problem.soft_constraint_penalty);
                        if precompute_projections {
                            *projection_slots[k].lock().unwrap() =
                                Some(ConstraintProjection::from_model_data(&data));
                        }
                        *slots[k].lock().unwrap() = Some(data);
                    }
                    Err(e) => {
                        first_error.lock().unwrap().get_or_insert(e);
                        break;
                    }
                }
            }
        });

        if let Some(e) = first_error.into_inner().unwrap() {
            return Err(e);
        }

        self.model_data = slots
            .into_iter()
            .map(|s| s.into_inner().unwrap().expect("model data slot"))
            .collect();
        if precompute_projections {
            self.projections = projection_slots
                .into_iter()
                .map(|s| s.into_inner().unwrap().expect("projection slot"))
                .collect();
        } else {
            self.projections = self
                .model_data
                .iter()
                .map(ConstraintProjection::from_model_data)
                .collect();
        }

        // Event-time approximations (jump map + pre-jump cost).
        self.event_data.clear();
        {
            let mut problem = self.problems.lock(0);
            for &p in &rollout.post_event_indices {
                if p == 0 {
                    // A jump applied at the start has no pre-event sample.
                    self.event_data.push(ModelData::default());
                    continue;
                }
                let k = p - 1;
                let t = rollout.time_trajectory[k];
                let x = &rollout.state_trajectory[k];
                let mut approximator = LinearQuadraticApproximator::new(&mut problem, check);
                let mut data = approximator.approximate_at_event(t, x)?;
                if matches!(self.strategy, SearchStrategy::LineSearch(_)) {
                    shift_hessian(
                        self.settings.line_search.hessian_correction_strategy,
                        &mut data.cost.dfdxx,
                        0.0,
                    );
                }
                self.event_data.push(data);
            }

            // Heuristics at the final time.
            let t_final = *rollout.time_trajectory.last().unwrap();
            let x_final = rollout.state_trajectory.last().unwrap();
            let mut approximator = LinearQuadraticApproximator::new(&mut problem, check);
            let (mut heuristics, final_state_eq) =
                approximator.approximate_at_final(t_final, x_final)?;
            if final_state_eq.num_rows() > 0 {
                let hv = &final_state_eq.f;
                let fm = &final_state_eq.dfdx;
                heuristics.f += 0.5 * state_eq_coeff * hv.norm_squared();
                heuristics.dfdx += fm.transpose() * hv * state_eq_coeff;
                heuristics.dfdxx += fm.transpose() * fm * state_eq_coeff;
            }
            if matches!(self.strategy, SearchStrategy::LineSearch(_)) {
                shift_hessian(
                    self.settings.line_search.hessian_correction_strategy,
                    &mut heuristics.dfdxx,
                    0.0,
                );
            }
            self.heuristics = heuristics;
        }

        Ok(())
    }

    fn solve_riccati(&mut self) -> Result<(), SolverError> {
        let config = BackwardPassConfig {
            algorithm: self.settings.algorithm,
            correction: self.settings.line_search.hessian_correction_strategy,
            correction_floor: self.settings.line_search.hessian_correction_multiple,
            shift_state_cost: matches!(self.strategy, SearchStrategy::LineSearch(_)),
            riccati_multiple: self.strategy.riccati_multiple(),
            substeps: if self.settings.use_nominal_time_for_backward_pass {
                1
            } else {
                2
            },
            check_numerics: self.settings.check_numerical_stability,
        };
        self.riccati = backward_pass(
            &self.nominal.rollout.time_trajectory,
            &self.model_data,
            &self.event_data,
            &self.nominal.rollout.post_event_indices,
            &self.projections,
            &self.heuristics,
            &config,
        )?;
        Ok(())
    }

    /// Maps the projected Riccati policy back to full input coordinates:
    /// `K = -D⁺C + Pu K̃`, `delta_uff = -D⁺e + Pu l̃`, with the bias chosen
    /// so the controller reproduces the nominal input on the nominal state.
    fn calculate_controller(&mut self) -> Result<(), SolverError> {
        let rollout = &self.nominal.rollout;
        let n = rollout.len();
        let riccati = &self.riccati;
        let projections = &self.projections;

        let slots: Vec<Mutex<Option<(Matrix, Vector, Vector)>>> =
            (0..n).map(|_| Mutex::new(None)).collect();
        let counter = StageCounter::new();

        self.pool.run(|_worker_id| loop {
            let k = counter.next();
            if k >= n {
                break;
            }
            let projection = &projections[k];
            let gain = -&projection.range_x + &projection.null_basis * &riccati.projected_gain[k];
            let mut bias = rollout.input_trajectory[k].clone();
            bias -= &gain * &rollout.state_trajectory[k];
            let delta_bias =
                -&projection.range_ff + &projection.null_basis * &riccati.projected_ff[k];
            *slots[k].lock().unwrap() = Some((gain, bias, delta_bias));
        });

        let mut controller = LinearController {
            time_stamp: rollout.time_trajectory.clone(),
            bias: Vec::with_capacity(n),
            gain: Vec::with_capacity(n),
            delta_bias: Vec::with_capacity(n),
        };
        for slot in slots {
            let (gain, bias, delta_bias) = slot.into_inner().unwrap().expect("controller slot");
            if self.settings.check_numerical_stability
                && (gain.iter().any(|v| !v.is_finite())
                    || delta_bias.iter().any(|v| !v.is_finite()))
            {
                return Err(SolverError::NumericalInstability(
                    "controller parameters are not finite".to_string(),
                ));
            }
            controller.gain.push(gain);
            controller.bias.push(bias);
            controller.delta_bias.push(delta_bias);
        }

        // Unless the horizon ends right after an event, the terminal sample
        // repeats the second-to-last policy entry.
        let ends_on_event = rollout
            .post_event_indices
            .last()
            .is_some_and(|&p| p == n - 1);
        if n > 1 && !ends_on_event {
            controller.gain[n - 1] = controller.gain[n - 2].clone();
            controller.bias[n - 1] = controller.bias[n - 2].clone();
            controller.delta_bias[n - 1] = controller.delta_bias[n - 2].clone();
        }

        self.nominal.controller = controller;
        Ok(())
    }

    fn run_search(
        &mut self,
        init_state: &Vector,
        mode_schedule: &ModeSchedule,
        unreliable_increment: bool,
    ) -> Result<StepOutcome, SolverError> {
        self.benchmark.search_strategy.start();
        let expected_cost = if unreliable_increment {
            // A policy without a valid feedforward makes the Riccati
            // prediction unreliable; fall back to the current merit.
            self.penalty_coefficients
                .acceptance_merit(&self.nominal.performance)
        } else {
            self.riccati.expected_cost()
        };
        let ctx = SearchContext {
            rollout: &self.rollout,
            problems: &self.problems,
            mode_schedule,
            init_time: self.init_time,
            init_state,
            final_time: self.final_time,
            penalty_coefficients: &self.penalty_coefficients,
        };
        let outcome = self.strategy.run(&ctx, expected_cost, &mut self.nominal);
        self.benchmark.search_strategy.stop();
        outcome
    }
}

impl Drop for DdpSolver {
    fn drop(&mut self) {
        if self.settings.display_benchmark {
            let breakdown = format_breakdown(
                self.total_num_iterations,
                &[
                    ("initialization", &self.benchmark.initialization),
                    ("LQ approximation", &self.benchmark.lq_approximation),
                    ("backward pass", &self.benchmark.backward_pass),
                    ("compute controller", &self.benchmark.compute_controller),
                    ("search strategy", &self.benchmark.search_strategy),
                ],
            );
            if !breakdown.is_empty() {
                info!("{} {breakdown}", self.settings.algorithm.name());
            }
        }
    }
}
