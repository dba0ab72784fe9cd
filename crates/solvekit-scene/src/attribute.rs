use serde::{Deserialize, Serialize};

/// A single scalar solvable value on a node.
///
/// The attribute is only a reference; its state (static, animated, locked),
/// bounds and values are queried from the scene at access time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Name of the owning node.
    pub node: String,
    /// Long name of the attribute, e.g. `translateX`.
    pub attr: String,
    /// User-defined minimum value, overrides the scene bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// User-defined maximum value, overrides the scene bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl Attribute {
    /// Create an attribute reference from a node and attribute name.
    pub fn new(node: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            attr: attr.into(),
            min_value: None,
            max_value: None,
        }
    }

    /// Create an attribute reference from a full `node.attr` name.
    ///
    /// Returns `None` if the name has no `.` separator.
    pub fn from_name(name: &str) -> Option<Self> {
        let (node, attr) = name.rsplit_once('.')?;
        if node.is_empty() || attr.is_empty() {
            return None;
        }
        Some(Self::new(node, attr))
    }

    /// Set the user-defined minimum and maximum values.
    pub fn with_bounds(mut self, min_value: Option<f64>, max_value: Option<f64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// The full `node.attr` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.node, self.attr)
    }
}
