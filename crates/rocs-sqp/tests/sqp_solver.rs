//! End-to-end SQP tests on the shared fixtures.

use rocs_core::controller::Controller;
use rocs_core::types::{Scalar, Vector};
use rocs_core::DefaultInitializer;
use rocs_sqp::settings::IntegratorType;
use rocs_sqp::{SqpSettings, SqpSolver};
use rocs_testing::{circular, two_mode};

const EVENT_TIME: Scalar = 0.1897;

fn two_mode_solver(settings: SqpSettings) -> SqpSolver {
    let reference = two_mode::reference_manager(EVENT_TIME);
    let problem = two_mode::problem(&reference);
    let mut solver = SqpSolver::new(
        settings,
        problem,
        DefaultInitializer::new(two_mode::INPUT_DIM),
    )
    .expect("solver construction");
    solver.set_reference_manager(reference);
    solver
}

fn two_mode_settings() -> SqpSettings {
    let mut settings = SqpSettings::default();
    settings.sqp_iteration = 20;
    settings.dt = 5e-3;
    settings.integrator_type = IntegratorType::Rk2;
    settings.n_threads = 2;
    settings
}

#[test]
fn solves_the_two_mode_switched_problem() {
    let mut solver = two_mode_solver(two_mode_settings());
    solver
        .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
        .expect("solve");

    let performance = solver.performance_indices();
    // The discretized optimum sits near the continuous-time optimal cost.
    assert!(
        (performance.total_cost - 9.766).abs() < 0.2,
        "total cost {}",
        performance.total_cost
    );
    // Shooting gaps closed.
    assert!(
        performance.state_eq_constraint_ise < 1e-6,
        "dynamics defect ISE {}",
        performance.state_eq_constraint_ise
    );
}

#[test]
fn solves_the_circular_kinematics_problem() {
    let mut settings = SqpSettings::default();
    settings.sqp_iteration = 30;
    settings.dt = 2e-2;
    settings.integrator_type = IntegratorType::Rk2;
    settings.n_threads = 2;
    settings.project_state_input_equality_constraints = true;

    let mut solver = SqpSolver::new(
        settings,
        circular::problem(),
        DefaultInitializer::new(circular::INPUT_DIM),
    )
    .unwrap();
    solver
        .run(0.0, Vector::from_vec(vec![1.0, 0.0]), 10.0, &[0.0, 10.0])
        .expect("solve");

    let performance = solver.performance_indices();
    assert!(
        performance.total_cost < 0.1,
        "total cost {}",
        performance.total_cost
    );
    assert!(
        performance.state_input_eq_constraint_ise < 1e-4,
        "state-input equality ISE {}",
        performance.state_input_eq_constraint_ise
    );
}

/// Thread count must not change the accepted iterates beyond accumulation
/// noise.
#[test]
fn thread_count_does_not_change_the_result() {
    let mut costs = Vec::new();
    for n_threads in [1usize, 3] {
        let mut settings = two_mode_settings();
        settings.n_threads = n_threads;
        let mut solver = two_mode_solver(settings);
        solver
            .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
            .unwrap();
        costs.push(solver.performance_indices().total_cost);
    }
    assert!(
        (costs[0] - costs[1]).abs() < 1e-9,
        "thread-count dependent costs {costs:?}"
    );
}

#[test]
fn feedback_policy_composes_projection_and_riccati_gains() {
    let mut settings = two_mode_settings();
    settings.use_feedback_policy = true;
    let mut solver = two_mode_solver(settings);
    solver
        .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
        .unwrap();

    let solution = solver.primal_solution(2.0);
    match solution.controller {
        Some(Controller::LinearFeedback(ref ctrl)) => {
            assert_eq!(ctrl.time_stamp.len(), solution.time_trajectory.len());
            assert!((ctrl.time_stamp.last().unwrap() - 2.0).abs() < 1e-9);
            // The policy reproduces the optimized inputs on the optimized
            // states away from event nodes.
            let k = solution.time_trajectory.len() / 2;
            let u = ctrl.compute_input(
                solution.time_trajectory[k],
                &solution.state_trajectory[k],
            );
            let mismatch = (&u - &solution.input_trajectory[k]).norm();
            assert!(mismatch < 1e-6, "policy mismatch {mismatch}");
        }
        other => panic!("expected a linear feedback policy, got {other:?}"),
    }
}

#[test]
fn feedforward_policy_is_the_default() {
    let mut solver = two_mode_solver(two_mode_settings());
    solver
        .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
        .unwrap();
    assert!(matches!(
        solver.primal_solution(2.0).controller,
        Some(Controller::Feedforward(_))
    ));
}

/// Pre-event nodes carry no optimized input; the stored samples inherit the
/// previous node, so only lengths and the post-event samples are observable.
#[test]
fn event_nodes_produce_equal_length_trajectories() {
    let mut solver = two_mode_solver(two_mode_settings());
    solver
        .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
        .unwrap();
    let solution = solver.primal_solution(2.0);
    assert_eq!(
        solution.state_trajectory.len(),
        solution.input_trajectory.len()
    );
    assert_eq!(solution.post_event_indices.len(), 1);
    let p = solution.post_event_indices[0];
    assert!((solution.time_trajectory[p] - EVENT_TIME).abs() < 1e-9);
    assert!((solution.time_trajectory[p - 1] - EVENT_TIME).abs() < 1e-9);
}

/// With no equality constraints in the problem, enabling the projection is
/// silently ignored and changes nothing.
#[test]
fn projection_without_constraints_matches_disabled_projection() {
    let mut results = Vec::new();
    for project in [true, false] {
        let mut settings = two_mode_settings();
        settings.project_state_input_equality_constraints = project;
        let mut solver = two_mode_solver(settings);
        solver
            .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
            .unwrap();
        results.push(solver.performance_indices());
    }
    assert!((results[0].total_cost - results[1].total_cost).abs() < 1e-12);
    assert!((results[0].merit - results[1].merit).abs() < 1e-12);
}

/// With a baseline whose constraint violation exceeds `g_max`, the first
/// accepted step must strictly reduce the total violation.
#[test]
fn filter_rejects_high_violation_and_first_accepted_step_reduces_it() {
    let mut settings = two_mode_settings();
    settings.g_max = 0.05;
    let mut solver = two_mode_solver(settings);
    solver
        .run(0.0, Vector::from_vec(vec![0.0, 2.0]), 2.0, &[0.0, 2.0])
        .expect("solve");

    let log = solver.iterations_log();
    assert!(log.len() >= 2, "need a baseline and one accepted step");
    let baseline_violation = log[0].constraint_violation();
    assert!(
        baseline_violation > 0.05,
        "baseline violation {baseline_violation} should exceed g_max"
    );
    let accepted_violation = log[1].constraint_violation();
    assert!(
        accepted_violation < baseline_violation,
        "first accepted step must reduce the violation: {accepted_violation} vs {baseline_violation}"
    );
}

/// Five successive overlapping windows must not fail.
#[test]
fn sliding_window_runs_do_not_fail() {
    let mut settings = two_mode_settings();
    settings.sqp_iteration = 5;
    let mut solver = two_mode_solver(settings);
    let windows = [(0.0, 0.6), (0.2, 0.8), (0.4, 1.0), (0.9, 1.5), (1.4, 2.0)];
    for (start, end) in windows {
        solver
            .run(start, Vector::from_vec(vec![0.0, 2.0]), end, &[start, end])
            .unwrap_or_else(|e| panic!("window [{start}, {end}] failed: {e}"));
    }
}
