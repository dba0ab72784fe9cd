use serde::{Deserialize, Serialize};

/// A 2D tracked point, referenced by node name.
///
/// Per-frame values and relationships to a camera and bundle are queried
/// through [`crate::SceneQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Marker {
    /// The marker node name.
    pub node: String,
}

impl Marker {
    /// Create a marker reference.
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

/// A camera, made of a transform node and a shape node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Camera {
    /// The transform node, holding translate/rotate/scale.
    pub transform: String,
    /// The shape node, holding focal length and film back.
    pub shape: String,
}

impl Camera {
    /// Create a camera reference.
    pub fn new(transform: impl Into<String>, shape: impl Into<String>) -> Self {
        Self {
            transform: transform.into(),
            shape: shape.into(),
        }
    }
}

/// A 3D point solved for position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    /// The bundle node name.
    pub node: String,
}

impl Bundle {
    /// Create a bundle reference.
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}
