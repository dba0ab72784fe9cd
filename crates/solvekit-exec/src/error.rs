use solvekit_compile::SolverError;
use solvekit_scene::SceneError;
use thiserror::Error;

/// Errors raised while executing actions.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Compiling the collection failed.
    #[error("Compile error: {0}")]
    Compile(#[from] SolverError),

    /// No handler is registered for the action function.
    #[error("Unknown action function: {0}")]
    UnknownAction(String),

    /// An action argument is missing or has the wrong shape.
    #[error("Invalid action argument: {0}")]
    InvalidArgument(String),

    /// Another execution is using the context.
    #[error("An execution is already running")]
    AlreadyRunning,

    /// A validate action reported an unsolvable problem.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Reading or writing the scene failed.
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// The solver could not make progress.
    #[error("Solve failed: {0}")]
    SolveFailed(String),
}
