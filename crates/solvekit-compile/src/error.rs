use solvekit_scene::SceneError;
use thiserror::Error;

/// Errors raised while compiling strategies into actions.
#[derive(Debug, Error)]
pub enum SolverError {
    /// The collection, strategy or its inputs cannot be compiled.
    #[error("{0}")]
    NotValid(String),

    /// A cached compile produced a different number of actions than the
    /// compile that filled the cache.
    #[error("Compile cache holds {expected} validate actions, compile produced {actual}")]
    CacheMismatch {
        /// Number of validate actions stored in the cache.
        expected: usize,
        /// Number of execute actions produced so far.
        actual: usize,
    },

    /// A scene query or edit failed.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Strategy data could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
