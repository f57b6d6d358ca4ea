//! Two-mode switched LQ task: both algorithms, both search strategies,
//! policy-type selection, MPC-style repeated runs and warm-start behaviour.

use rocs_core::controller::Controller;
use rocs_core::rollout::RolloutSettings;
use rocs_core::types::{Scalar, Vector};
use rocs_core::DefaultInitializer;
use rocs_ddp::settings::{Algorithm, SearchStrategyKind};
use rocs_ddp::{DdpSettings, DdpSolver};
use rocs_testing::two_mode;

const START_TIME: Scalar = 0.0;
const FINAL_TIME: Scalar = 2.0;
const EVENT_TIME: Scalar = 0.1897;
const EXPECTED_COST: Scalar = 9.766;

fn settings(algorithm: Algorithm, strategy: SearchStrategyKind, n_threads: usize) -> DdpSettings {
    let mut settings = DdpSettings::default();
    settings.algorithm = algorithm;
    settings.strategy = strategy;
    settings.n_threads = n_threads;
    settings.max_num_iterations = 30;
    settings.min_rel_cost = 1e-3;
    settings.pre_compute_riccati_terms = true;
    settings.use_nominal_time_for_backward_pass = false;
    settings.use_feedback_policy = true;
    settings.check_numerical_stability = true;
    settings.line_search.min_step_length = 1e-4;
    settings.rollout = RolloutSettings {
        abs_tol_ode: 1e-10,
        rel_tol_ode: 1e-7,
        time_step: 1e-2,
        max_num_steps_per_second: 10_000,
    };
    settings
}

fn build_solver(settings: DdpSettings) -> DdpSolver {
    let reference = two_mode::reference_manager(EVENT_TIME);
    let problem = two_mode::problem(&reference);
    let mut solver = DdpSolver::new(
        settings,
        problem,
        DefaultInitializer::new(two_mode::INPUT_DIM),
    )
    .expect("solver construction");
    solver.set_reference_manager(reference);
    solver
}

fn init_state() -> Vector {
    Vector::from_vec(vec![0.0, 2.0])
}

fn partitions() -> [Scalar; 3] {
    [START_TIME, EVENT_TIME, FINAL_TIME]
}

fn assert_converged(solver: &DdpSolver, settings: &DdpSettings, label: &str) {
    let performance = solver.performance_indices();
    assert!(
        (performance.total_cost - EXPECTED_COST).abs() < 10.0 * settings.min_rel_cost,
        "{label}: total cost {} should be within {} of {EXPECTED_COST}",
        performance.total_cost,
        10.0 * settings.min_rel_cost
    );
    assert!(
        performance.state_input_eq_constraint_ise < 10.0 * settings.constraint_tolerance,
        "{label}: state-input equality ISE {}",
        performance.state_input_eq_constraint_ise
    );
    assert!(
        performance.state_eq_constraint_ise < 10.0 * settings.constraint_tolerance,
        "{label}: state-only equality ISE {}",
        performance.state_eq_constraint_ise
    );
}

fn solve_combination(algorithm: Algorithm, strategy: SearchStrategyKind, n_threads: usize) {
    let settings = settings(algorithm, strategy, n_threads);
    let mut solver = build_solver(settings.clone());
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .expect("solve");
    let label = format!("{} / {strategy:?} / {n_threads} threads", algorithm.name());
    assert_converged(&solver, &settings, &label);
}

#[test]
fn slq_line_search() {
    for n_threads in [1usize, 3] {
        solve_combination(Algorithm::Slq, SearchStrategyKind::LineSearch, n_threads);
    }
}

#[test]
fn slq_levenberg_marquardt() {
    for n_threads in [1usize, 3] {
        solve_combination(Algorithm::Slq, SearchStrategyKind::LevenbergMarquardt, n_threads);
    }
}

#[test]
fn ilqr_line_search() {
    for n_threads in [1usize, 3] {
        solve_combination(Algorithm::Ilqr, SearchStrategyKind::LineSearch, n_threads);
    }
}

#[test]
fn ilqr_levenberg_marquardt() {
    for n_threads in [1usize, 3] {
        solve_combination(Algorithm::Ilqr, SearchStrategyKind::LevenbergMarquardt, n_threads);
    }
}

#[test]
fn feedback_policy_produces_a_linear_controller() {
    let mut settings = settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 2);
    settings.use_feedback_policy = true;
    let mut solver = build_solver(settings);
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();

    let solution = solver.primal_solution(FINAL_TIME);
    match solution.controller {
        Some(Controller::LinearFeedback(ref ctrl)) => {
            assert!(
                (ctrl.time_stamp.last().copied().unwrap() - FINAL_TIME).abs() < 1e-9,
                "policy must cover the final time"
            );
        }
        other => panic!("expected a linear feedback policy, got {other:?}"),
    }
    assert!(
        (solution.time_trajectory.last().copied().unwrap() - FINAL_TIME).abs() < 1e-9
    );
}

#[test]
fn feedforward_policy_produces_an_input_table() {
    let mut settings = settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 2);
    settings.use_feedback_policy = false;
    let mut solver = build_solver(settings);
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();

    let solution = solver.primal_solution(FINAL_TIME);
    match solution.controller {
        Some(Controller::Feedforward(ref ctrl)) => {
            assert!((ctrl.time_stamp.last().copied().unwrap() - FINAL_TIME).abs() < 1e-9);
        }
        other => panic!("expected a feedforward policy, got {other:?}"),
    }
}

/// The optimized linear policy must reproduce the nominal inputs on the
/// nominal states.
#[test]
fn linear_controller_is_consistent_with_the_nominal() {
    let mut solver = build_solver(settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 1));
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();
    let solution = solver.primal_solution(FINAL_TIME);
    let controller = solution.controller.as_ref().unwrap();

    for k in (0..solution.time_trajectory.len() - 1).step_by(20) {
        let t = solution.time_trajectory[k];
        if solution.post_event_indices.iter().any(|&p| p == k || p == k + 1) {
            continue; // duplicated event times interpolate ambiguously
        }
        let u = controller.compute_input(t, &solution.state_trajectory[k]);
        let diff = (&u - &solution.input_trajectory[k]).norm();
        assert!(
            diff < 1e-6,
            "controller/nominal mismatch {diff} at t = {t}"
        );
    }
}

/// MPC-style sliding windows over the same problem must not fail.
#[test]
fn sliding_window_runs_do_not_fail() {
    let mut settings = settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 2);
    settings.max_num_iterations = 10;
    let mut solver = build_solver(settings);

    let windows = [
        (0.2, 0.7),
        (0.4, 0.9),
        (0.6, 1.2),
        (1.1, 1.5),
        (1.6, 2.0),
    ];
    for (start, end) in windows {
        solver
            .run(start, init_state(), end, &partitions())
            .unwrap_or_else(|e| panic!("window [{start}, {end}] failed: {e}"));
    }
}

/// Re-running from the converged optimum must terminate almost immediately.
#[test]
fn warm_start_at_the_optimum_terminates_quickly() {
    let mut solver = build_solver(settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 1));
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();

    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();
    // Init rollout plus at most one non-trivial iteration.
    assert!(
        solver.iterations_log().len() <= 3,
        "warm start took {} logged iterations",
        solver.iterations_log().len()
    );
}

/// `reset` followed by an identical run reproduces the fresh solve.
#[test]
fn reset_and_rerun_is_idempotent() {
    let mut solver = build_solver(settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 1));
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();
    let first = solver.performance_indices();

    solver.reset();
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();
    let second = solver.performance_indices();

    assert!((first.total_cost - second.total_cost).abs() < 1e-9);
    assert!(
        (first.merit - second.merit).abs() < 1e-9,
        "merit changed across reset: {} vs {}",
        first.merit,
        second.merit
    );
}

/// The stored merit always equals cost plus inequality penalty.
#[test]
fn merit_bookkeeping_invariant_holds_over_iterations() {
    let mut solver = build_solver(settings(Algorithm::Slq, SearchStrategyKind::LineSearch, 1));
    solver
        .run(START_TIME, init_state(), FINAL_TIME, &partitions())
        .unwrap();
    for (i, performance) in solver.iterations_log().iter().enumerate() {
        let expected = performance.total_cost + performance.inequality_constraint_penalty;
        assert!(
            (performance.merit - expected).abs() < 1e-9,
            "merit invariant violated at logged iteration {i}"
        );
    }
}
