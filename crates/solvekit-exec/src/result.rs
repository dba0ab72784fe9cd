use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Time spent in parts of a solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStats {
    /// Wall time of the whole solve.
    pub solve_seconds: f64,
    /// Time spent evaluating residuals.
    pub function_seconds: f64,
    /// Time spent building the Jacobian.
    pub jacobian_seconds: f64,
    /// Number of residual evaluations.
    pub function_calls: usize,
    /// Number of Jacobian evaluations.
    pub jacobian_calls: usize,
}

impl std::ops::AddAssign for TimerStats {
    fn add_assign(&mut self, other: Self) {
        self.solve_seconds += other.solve_seconds;
        self.function_seconds += other.function_seconds;
        self.jacobian_seconds += other.jacobian_seconds;
        self.function_calls += other.function_calls;
        self.jacobian_calls += other.jacobian_calls;
    }
}

/// Reprojection error statistics of a solve, in film units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Average error before the first iteration.
    pub initial: f64,
    /// Average error after the last iteration.
    pub final_average: f64,
    /// Largest per-observation error after the last iteration.
    pub final_maximum: f64,
    /// Smallest per-observation error after the last iteration.
    pub final_minimum: f64,
}

/// Outcome of one `solve` action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    /// Did the solve finish without failing?
    pub success: bool,
    /// Why the solver stopped.
    pub stop_message: String,
    /// Iterations run.
    pub iterations: usize,
    /// Was the solve stopped by an interrupt?
    pub user_interrupted: bool,
    /// Error statistics.
    pub error_stats: ErrorStats,
    /// Time statistics.
    pub timer_stats: TimerStats,
    /// Number of solved parameters.
    pub number_of_parameters: usize,
    /// Number of residual values.
    pub number_of_errors: usize,
    /// Frames solved.
    pub frame_list: Vec<i32>,
    /// Average error per frame.
    pub frame_error_list: BTreeMap<i32, f64>,
    /// Error per marker per frame.
    pub marker_error_list: BTreeMap<String, BTreeMap<i32, f64>>,
}

impl SolveResult {
    /// The final average error.
    pub fn final_error(&self) -> f64 {
        self.error_stats.final_average
    }
}

/// Sorted union of the solved frames.
pub fn merge_frame_list(results: &[SolveResult]) -> Vec<i32> {
    results
        .iter()
        .flat_map(|r| r.frame_list.iter().copied())
        .collect::<BTreeSet<i32>>()
        .into_iter()
        .collect()
}

/// Per-frame errors of sequential solves, later solves win.
pub fn merge_frame_error_list(results: &[SolveResult]) -> BTreeMap<i32, f64> {
    let mut merged = BTreeMap::new();
    for result in results {
        merged.extend(result.frame_error_list.iter().map(|(f, e)| (*f, *e)));
    }
    merged
}

/// Average of per-frame errors, `0.0` when empty.
pub fn average_frame_error(frame_errors: &BTreeMap<i32, f64>) -> f64 {
    if frame_errors.is_empty() {
        return 0.0;
    }
    frame_errors.values().sum::<f64>() / frame_errors.len() as f64
}

/// The frame with the largest error, and that error.
///
/// The frame is `None` when no frame has a positive error.
pub fn max_frame_error(frame_errors: &BTreeMap<i32, f64>) -> (Option<i32>, f64) {
    let mut frame = None;
    let mut error = 0.0;
    for (f, e) in frame_errors {
        if *e > error {
            frame = Some(*f);
            error = *e;
        }
    }
    (frame, error)
}

/// Per-marker per-frame errors of sequential solves, later solves win.
pub fn merge_marker_error_list(results: &[SolveResult]) -> BTreeMap<String, BTreeMap<i32, f64>> {
    let mut merged: BTreeMap<String, BTreeMap<i32, f64>> = BTreeMap::new();
    for result in results {
        for (marker, errors) in &result.marker_error_list {
            merged
                .entry(marker.clone())
                .or_default()
                .extend(errors.iter().map(|(f, e)| (*f, *e)));
        }
    }
    merged
}

/// Sorted names of every marker with an error value.
pub fn merge_marker_node_list(results: &[SolveResult]) -> Vec<String> {
    results
        .iter()
        .flat_map(|r| r.marker_error_list.keys().cloned())
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Sum of the time statistics.
pub fn combine_timer_stats(results: &[SolveResult]) -> TimerStats {
    let mut total = TimerStats::default();
    for result in results {
        total += result.timer_stats;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn result(frames: &[(i32, f64)]) -> SolveResult {
        SolveResult {
            frame_list: frames.iter().map(|(f, _)| *f).collect(),
            frame_error_list: frames.iter().copied().collect(),
            marker_error_list: BTreeMap::from([(
                "marker1".to_string(),
                frames.iter().copied().collect(),
            )]),
            timer_stats: TimerStats {
                solve_seconds: 0.5,
                function_calls: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_results() {
        let results = [result(&[(3, 1.0), (1, 2.0)]), result(&[(1, 0.5), (5, 4.0)])];
        assert_eq!(merge_frame_list(&results), vec![1, 3, 5]);

        let errors = merge_frame_error_list(&results);
        assert_relative_eq!(errors[&1], 0.5);
        assert_relative_eq!(average_frame_error(&errors), 5.5 / 3.0);
        assert_eq!(max_frame_error(&errors), (Some(5), 4.0));
        assert_eq!(max_frame_error(&BTreeMap::new()), (None, 0.0));

        let markers = merge_marker_error_list(&results);
        assert_eq!(markers["marker1"].len(), 3);
        assert_eq!(merge_marker_node_list(&results), vec!["marker1".to_string()]);

        let timers = combine_timer_stats(&results);
        assert_relative_eq!(timers.solve_seconds, 1.0);
        assert_eq!(timers.function_calls, 6);
    }
}
