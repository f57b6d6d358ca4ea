//! Annotated time discretization
//!
//! A shooting grid over `[t_0, t_f]` with events inserted as a pre-event
//! node immediately followed by an interior node at the same time. The
//! pre-event interval carries no input; the duplicated node restarts the
//! shooting after the jump.

use rocs_core::misc;
use rocs_core::types::Scalar;

/// Node annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeTag {
    Interior,
    PreEvent,
}

/// One node of the shooting grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnnotatedTime {
    pub time: Scalar,
    pub tag: TimeTag,
}

impl AnnotatedTime {
    pub fn interior(time: Scalar) -> Self {
        Self { time, tag: TimeTag::Interior }
    }

    pub fn pre_event(time: Scalar) -> Self {
        Self { time, tag: TimeTag::PreEvent }
    }
}

/// Builds the shooting grid: roughly uniform intervals of length `dt`
/// between consecutive boundaries, with every interior event time producing
/// a `(PreEvent, Interior)` node pair.
pub fn time_discretization_with_events(
    init_time: Scalar,
    final_time: Scalar,
    dt: Scalar,
    event_times: &[Scalar],
) -> Vec<AnnotatedTime> {
    debug_assert!(final_time > init_time);
    debug_assert!(dt > 0.0);

    let interior_events: Vec<Scalar> = event_times
        .iter()
        .copied()
        .filter(|&te| te > init_time + misc::WEAK_EPSILON && te < final_time - misc::WEAK_EPSILON)
        .collect();

    let mut boundaries = Vec::with_capacity(interior_events.len() + 2);
    boundaries.push(init_time);
    boundaries.extend(interior_events.iter().copied());
    boundaries.push(final_time);

    let mut grid = Vec::new();
    for segment in 0..boundaries.len() - 1 {
        let (a, b) = (boundaries[segment], boundaries[segment + 1]);
        let num_intervals = (((b - a) / dt).round() as usize).max(1);
        let step = (b - a) / num_intervals as Scalar;
        for k in 0..num_intervals {
            grid.push(AnnotatedTime::interior(a + k as Scalar * step));
        }
        if segment + 1 < boundaries.len() - 1 {
            // The node closing this segment is the pre-event node; its twin
            // opens the next segment.
            grid.push(AnnotatedTime::pre_event(b));
        }
    }
    grid.push(AnnotatedTime::interior(final_time));
    grid
}

/// Duration of the interval starting at node `i`.
pub fn interval_duration(grid: &[AnnotatedTime], i: usize) -> Scalar {
    grid[i + 1].time - grid[i].time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_grid_without_events() {
        let grid = time_discretization_with_events(0.0, 1.0, 0.1, &[]);
        assert_eq!(grid.len(), 11);
        assert!(grid.iter().all(|n| n.tag == TimeTag::Interior));
        assert!((grid[5].time - 0.5).abs() < 1e-12);
        assert_eq!(grid.last().unwrap().time, 1.0);
    }

    #[test]
    fn events_insert_duplicated_node_pairs() {
        let grid = time_discretization_with_events(0.0, 1.0, 0.1, &[0.35]);
        let pre = grid
            .iter()
            .position(|n| n.tag == TimeTag::PreEvent)
            .expect("pre-event node");
        assert!((grid[pre].time - 0.35).abs() < 1e-12);
        assert_eq!(grid[pre + 1].tag, TimeTag::Interior);
        assert!((grid[pre + 1].time - 0.35).abs() < 1e-12);
        // Total span is preserved.
        assert_eq!(grid.last().unwrap().time, 1.0);
    }

    #[test]
    fn events_outside_the_horizon_are_ignored() {
        let grid = time_discretization_with_events(0.0, 1.0, 0.1, &[-0.5, 0.0, 1.0, 2.0]);
        assert!(grid.iter().all(|n| n.tag == TimeTag::Interior));
    }
}
