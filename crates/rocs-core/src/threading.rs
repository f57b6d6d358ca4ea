//! Worker pool and per-worker problem clones
//!
//! Horizon-sharded fork-join parallelism: a fixed-size pool of OS threads,
//! each broadcast task pulling stage indices from an atomic counter. Every
//! worker owns a deep clone of the problem bundle, so pre-computation caches
//! stay thread-local and no term is ever shared mutably.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::error::SolverError;
use crate::model::problem::OptimalControlProblem;
use crate::reference::TargetTrajectories;

/// Fixed-size pool of `n_threads` OS-level threads.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    n_threads: usize,
}

impl WorkerPool {
    pub fn new(n_threads: usize) -> Result<Self, SolverError> {
        if n_threads < 1 {
            return Err(SolverError::Configuration(
                "n_threads must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| SolverError::Configuration(format!("worker pool: {e}")))?;
        Ok(Self { pool, n_threads })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Runs `task(worker_id)` once on every pool thread and blocks until all
    /// workers return (fork-join barrier).
    pub fn run<F>(&self, task: F)
    where
        F: Fn(usize) + Sync,
    {
        self.pool.broadcast(|ctx| task(ctx.index()));
    }
}

/// Monotone stage-index dispenser shared by the workers of one phase.
#[derive(Default)]
pub struct StageCounter {
    next: AtomicUsize,
}

impl StageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws the next unprocessed stage index.
    pub fn next(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// One problem clone per worker.
///
/// Slots are behind uncontended mutexes: worker `i` only ever locks slot
/// `i`, the locks merely make the `&mut` access safe to express.
pub struct WorkerProblems {
    slots: Vec<Mutex<OptimalControlProblem>>,
}

impl WorkerProblems {
    pub fn new(problem: OptimalControlProblem, n_workers: usize) -> Self {
        let mut slots = Vec::with_capacity(n_workers);
        for _ in 0..n_workers.saturating_sub(1) {
            slots.push(Mutex::new(problem.clone()));
        }
        slots.push(Mutex::new(problem));
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Exclusive access to worker `i`'s problem clone.
    pub fn lock(&self, worker_id: usize) -> MutexGuard<'_, OptimalControlProblem> {
        self.slots[worker_id]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs the reference targets into every clone before a run.
    pub fn set_target_trajectories(&mut self, targets: &TargetTrajectories) {
        for slot in &mut self.slots {
            slot.get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .target_trajectories = targets.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_is_a_configuration_error() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(SolverError::Configuration(_))
        ));
    }

    #[test]
    fn broadcast_covers_every_worker_exactly_once() {
        let pool = WorkerPool::new(3).unwrap();
        let hits = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];
        pool.run(|w| {
            hits[w].fetch_add(1, Ordering::Relaxed);
        });
        for h in &hits {
            assert_eq!(h.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn stage_counter_partitions_the_index_range() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = StageCounter::new();
        let seen = Mutex::new(vec![0usize; 100]);
        pool.run(|_| loop {
            let i = counter.next();
            if i >= 100 {
                break;
            }
            seen.lock().unwrap()[i] += 1;
        });
        assert!(seen.lock().unwrap().iter().all(|&c| c == 1));
    }
}
