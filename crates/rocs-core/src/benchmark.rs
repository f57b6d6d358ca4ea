//! Per-phase benchmark timers

use std::time::{Duration, Instant};

use crate::types::Scalar;

/// Accumulating wall-clock timer for one solver phase.
#[derive(Clone, Debug, Default)]
pub struct PhaseTimer {
    total: Duration,
    count: usize,
    started: Option<Instant>,
}

impl PhaseTimer {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.total += started.elapsed();
            self.count += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_ms(&self) -> Scalar {
        self.total.as_secs_f64() * 1e3
    }

    pub fn average_ms(&self) -> Scalar {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms() / self.count as Scalar
        }
    }
}

/// Formats a benchmark breakdown: average per phase and share of the total.
pub fn format_breakdown(iterations: usize, phases: &[(&str, &PhaseTimer)]) -> String {
    let total: Scalar = phases.iter().map(|(_, t)| t.total_ms()).sum();
    if total <= 0.0 {
        return String::new();
    }
    let mut out = format!("benchmark over {iterations} iterations:");
    for (name, timer) in phases {
        out.push_str(&format!(
            "\n  {name:<20} {:>9.3} ms avg  ({:>5.1}% of total)",
            timer.average_ms(),
            timer.total_ms() / total * 100.0
        ));
    }
    out
}
