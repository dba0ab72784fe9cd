#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Running and interrupt flags of an execution.
pub mod context;

/// Error types for executing actions.
pub mod error;

/// The action executor and validation.
pub mod executor;

/// Scene edits run by non-solve actions.
pub mod ops;

/// The reprojection least squares problem of a solve action.
pub mod problem;

/// Solve results and their merging.
pub mod result;

pub use context::{ExecutionContext, RunningGuard};
pub use error::ExecError;
pub use executor::{ActionState, ActionStatus, ExecuteOptions, Executor, Handler, ValidateMode};
pub use problem::{SolveOptions, SolveProblem};
pub use result::{
    average_frame_error, combine_timer_stats, max_frame_error, merge_frame_error_list,
    merge_frame_list, merge_marker_error_list, merge_marker_node_list, ErrorStats, SolveResult,
    TimerStats,
};
