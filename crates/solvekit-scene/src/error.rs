use thiserror::Error;

/// Errors raised by scene queries, edits and persistence.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The node does not exist in the scene.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The attribute does not exist on the node.
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    /// The node exists but is of the wrong kind for the operation.
    #[error("Node {node} is not a {expected}")]
    WrongNodeType {
        /// Name of the offending node.
        node: String,
        /// The kind of node the operation expected.
        expected: &'static str,
    },

    /// A node with this name already exists.
    #[error("Node already exists: {0}")]
    DuplicateNode(String),

    /// The attribute is locked and cannot be changed.
    #[error("Attribute is locked: {0}")]
    AttributeLocked(String),

    /// Reading or writing a scene file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Scene JSON could not be encoded or decoded.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
