use serde::{Deserialize, Serialize};

use crate::{Attribute, Bundle, Camera, Marker};

/// Type of a node in the host scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// A 2D marker.
    Marker,
    /// A 3D bundle.
    Bundle,
    /// A camera transform or camera shape.
    Camera,
    /// Any other node, e.g. a rig control.
    Other,
    /// The node does not exist.
    Unknown,
}

/// Solve state of an attribute at the time of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrState {
    /// The attribute could not be found.
    Invalid,
    /// The attribute has a single value for all frames.
    Static,
    /// The attribute has keyframes.
    Animated,
    /// The attribute may not be changed.
    Locked,
}

/// Value kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AttrKind {
    /// A plain distance or unitless value.
    #[default]
    Linear,
    /// An angle in degrees, wrapping every 360.
    Angle,
}

/// Read-only view of the host scene consumed by the solve compiler.
///
/// Implemented by the in-memory [`crate::Scene`]; a host integration
/// implements it over its own node and attribute storage.
pub trait SceneQuery {
    /// Type of the named node.
    fn object_type(&self, node: &str) -> ObjectType;

    /// Current solve state of the attribute.
    fn attr_state(&self, attr: &Attribute) -> AttrState;

    /// Value kind of the attribute.
    fn attr_kind(&self, attr: &Attribute) -> AttrKind;

    /// Minimum values defined by the host; empty when unbounded.
    fn attr_min_values(&self, attr: &Attribute) -> Vec<f64>;

    /// Maximum values defined by the host; empty when unbounded.
    fn attr_max_values(&self, attr: &Attribute) -> Vec<f64>;

    /// Is the marker enabled on the frame?
    fn marker_enabled(&self, marker: &Marker, frame: i32) -> bool;

    /// Weight of the marker on the frame, `0.0` when disabled.
    fn marker_weight(&self, marker: &Marker, frame: i32) -> f64;

    /// Sorted frames the marker is enabled on, within an optional range.
    fn marker_enabled_frames(
        &self,
        marker: &Marker,
        start: Option<i32>,
        end: Option<i32>,
    ) -> Vec<i32>;

    /// The camera the marker is attached to.
    fn marker_camera(&self, marker: &Marker) -> Option<Camera>;

    /// The bundle the marker is attached to.
    fn marker_bundle(&self, marker: &Marker) -> Option<Bundle>;

    /// Markers attached to the bundle.
    fn bundle_markers(&self, bundle: &Bundle) -> Vec<Marker>;

    /// Which attribute changes which marker's predicted 2D position.
    ///
    /// Returns a `markers.len() x attrs.len()` matrix.
    fn affects(&self, markers: &[Marker], attrs: &[Attribute]) -> Vec<Vec<bool>>;
}
