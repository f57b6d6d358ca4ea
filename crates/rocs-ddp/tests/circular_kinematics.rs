//! Constrained circular-kinematics task solved by both DDP variants.

use rocs_core::rollout::RolloutSettings;
use rocs_core::types::{Scalar, Vector};
use rocs_core::DefaultInitializer;
use rocs_ddp::settings::{Algorithm, HessianCorrectionStrategy, SearchStrategyKind};
use rocs_ddp::{DdpSettings, DdpSolver};
use rocs_testing::circular;

const START_TIME: Scalar = 0.0;
const FINAL_TIME: Scalar = 10.0;
const EXPECTED_COST: Scalar = 0.1;

fn settings(algorithm: Algorithm, n_threads: usize) -> DdpSettings {
    let mut settings = DdpSettings::default();
    settings.algorithm = algorithm;
    settings.n_threads = n_threads;
    settings.max_num_iterations = 100;
    settings.min_rel_cost = 1e-3;
    settings.constraint_tolerance = 1e-5;
    settings.constraint_penalty_initial_value = 2.0;
    settings.constraint_penalty_increase_rate = 1.5;
    settings.check_numerical_stability = false;
    settings.use_nominal_time_for_backward_pass = true;
    settings.strategy = SearchStrategyKind::LineSearch;
    settings.line_search.min_step_length = 0.01;
    settings.line_search.hessian_correction_strategy =
        HessianCorrectionStrategy::CholeskyModification;
    settings.line_search.hessian_correction_multiple = 1e-3;
    settings.rollout = RolloutSettings {
        abs_tol_ode: 1e-9,
        rel_tol_ode: 1e-7,
        time_step: 2e-2,
        max_num_steps_per_second: 10_000,
    };
    settings
}

fn solve(algorithm: Algorithm, n_threads: usize) {
    let settings = settings(algorithm, n_threads);
    let constraint_tolerance = settings.constraint_tolerance;
    let mut solver = DdpSolver::new(
        settings,
        circular::problem(),
        DefaultInitializer::new(circular::INPUT_DIM),
    )
    .expect("solver construction");

    let init_state = Vector::from_vec(vec![1.0, 0.0]);
    let partitions = [START_TIME, (START_TIME + FINAL_TIME) / 2.0, FINAL_TIME];
    solver
        .run(START_TIME, init_state, FINAL_TIME, &partitions)
        .expect("solve");

    let performance = solver.performance_indices();
    assert!(
        performance.total_cost < EXPECTED_COST,
        "{} x{}: total cost {} should be below {EXPECTED_COST}",
        algorithm.name(),
        n_threads,
        performance.total_cost
    );
    assert!(
        performance.state_input_eq_constraint_ise < 10.0 * constraint_tolerance,
        "{} x{}: state-input equality ISE {} above tolerance",
        algorithm.name(),
        n_threads,
        performance.state_input_eq_constraint_ise
    );
}

#[test]
fn slq_line_search_single_thread() {
    solve(Algorithm::Slq, 1);
}

#[test]
fn slq_line_search_multi_thread() {
    solve(Algorithm::Slq, 3);
}

#[test]
fn ilqr_line_search_single_thread() {
    solve(Algorithm::Ilqr, 1);
}

#[test]
fn ilqr_line_search_multi_thread() {
    solve(Algorithm::Ilqr, 3);
}

/// Thread count must not change the accepted iterate beyond accumulation
/// noise.
#[test]
fn thread_count_does_not_change_the_result() {
    let mut costs = Vec::new();
    for n_threads in [1usize, 3] {
        let settings = settings(Algorithm::Slq, n_threads);
        let mut solver = DdpSolver::new(
            settings,
            circular::problem(),
            DefaultInitializer::new(circular::INPUT_DIM),
        )
        .unwrap();
        solver
            .run(
                START_TIME,
                Vector::from_vec(vec![1.0, 0.0]),
                FINAL_TIME,
                &[START_TIME, FINAL_TIME],
            )
            .unwrap();
        costs.push(solver.performance_indices().total_cost);
    }
    let spread = (costs[0] - costs[1]).abs();
    assert!(
        spread < 1e-6,
        "thread-count dependent cost spread {spread}"
    );
}
