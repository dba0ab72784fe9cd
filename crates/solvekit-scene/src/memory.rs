use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    AttrKind, AttrState, Attribute, Bundle, Camera, CameraPose, Marker, ObjectType, SceneError,
    SceneQuery,
};

/// Attribute names holding a transform's translation.
pub const TRANSLATE_ATTRS: [&str; 3] = ["translateX", "translateY", "translateZ"];
/// Attribute names holding a transform's rotation, in degrees.
pub const ROTATE_ATTRS: [&str; 3] = ["rotateX", "rotateY", "rotateZ"];
/// Attribute names holding a transform's scale.
pub const SCALE_ATTRS: [&str; 3] = ["scaleX", "scaleY", "scaleZ"];
/// Camera shape attribute holding the focal length in millimetres.
pub const FOCAL_LENGTH_ATTR: &str = "focalLength";
/// Camera shape attribute holding the horizontal film aperture in millimetres.
pub const FILM_WIDTH_ATTR: &str = "horizontalFilmAperture";
/// Camera shape attribute holding the vertical film aperture in millimetres.
pub const FILM_HEIGHT_ATTR: &str = "verticalFilmAperture";

/// Interpolation type on one side of a keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TangentType {
    /// Straight line towards the neighbouring key.
    Linear,
    /// Hold the value until the next key.
    Step,
    /// Smooth curve through the neighbouring keys.
    #[default]
    Smooth,
}

/// A single keyframe value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Value at the key.
    pub value: f64,
    /// Tangent entering the key.
    #[serde(default)]
    pub in_tangent: TangentType,
    /// Tangent leaving the key.
    #[serde(default)]
    pub out_tangent: TangentType,
}

impl Keyframe {
    /// Create a key with smooth tangents.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            in_tangent: TangentType::Smooth,
            out_tangent: TangentType::Smooth,
        }
    }
}

/// Stored state of one attribute.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttrData {
    /// Value used when the attribute has no keys.
    #[serde(default)]
    pub value: f64,
    /// Keyframes by frame number; non-empty means animated.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<i32, Keyframe>,
    /// Locked attributes are never solved.
    #[serde(default)]
    pub locked: bool,
    /// Value kind of the attribute.
    #[serde(default)]
    pub kind: AttrKind,
    /// Minimum values, empty when unbounded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub min: Vec<f64>,
    /// Maximum values, empty when unbounded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub max: Vec<f64>,
}

impl AttrData {
    /// Create an unlocked static attribute.
    pub fn with_value(value: f64) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// Create an unlocked static angle attribute.
    pub fn angle(value: f64) -> Self {
        Self {
            value,
            kind: AttrKind::Angle,
            ..Default::default()
        }
    }

    /// Returns true if the attribute has keyframes.
    pub fn is_animated(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Evaluate the attribute at a frame.
    ///
    /// Values before the first key and after the last key are held.
    pub fn evaluate(&self, frame: i32) -> f64 {
        let before = self.keys.range(..=frame).next_back();
        let after = self.keys.range(frame..).next();
        match (before, after) {
            (Some((&f0, k0)), Some((&f1, k1))) if f0 != f1 => {
                self.interpolate(f0, k0, f1, k1, frame as f64)
            }
            (Some((_, key)), _) | (None, Some((_, key))) => key.value,
            (None, None) => self.value,
        }
    }

    fn interpolate(&self, f0: i32, k0: &Keyframe, f1: i32, k1: &Keyframe, t: f64) -> f64 {
        if k0.out_tangent == TangentType::Step {
            return k0.value;
        }
        let span = (f1 - f0) as f64;
        let linear_slope = (k1.value - k0.value) / span;

        let m0 = match k0.out_tangent {
            TangentType::Smooth => self
                .keys
                .range(..f0)
                .next_back()
                .map(|(&fp, kp)| (k1.value - kp.value) / (f1 - fp) as f64)
                .unwrap_or(linear_slope),
            _ => linear_slope,
        };
        let m1 = match k1.in_tangent {
            TangentType::Smooth => self
                .keys
                .range((Bound::Excluded(f1), Bound::Unbounded))
                .next()
                .map(|(&fn_, kn)| (kn.value - k0.value) / (fn_ - f0) as f64)
                .unwrap_or(linear_slope),
            _ => linear_slope,
        };

        // cubic hermite basis
        let s = (t - f0 as f64) / span;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        h00 * k0.value + h10 * span * m0 + h01 * k1.value + h11 * span * m1
    }
}

/// A tracked 2D position on one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerSample {
    /// Horizontal film coordinate.
    pub x: f64,
    /// Vertical film coordinate.
    pub y: f64,
    /// Is the marker used on this frame?
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Relative importance of this sample.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// Relationships and samples of a marker node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkerData {
    /// Camera transform node the marker is seen through.
    pub camera: String,
    /// Bundle node the marker measures, if any.
    #[serde(default)]
    pub bundle: Option<String>,
    /// Samples by frame number.
    #[serde(default)]
    pub samples: BTreeMap<i32, MarkerSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NodeData {
    Camera { shape: String },
    CameraShape { transform: String },
    Bundle,
    Marker(MarkerData),
    Other,
}

/// A flat in-memory scene.
///
/// Cameras, bundles and markers live in a single namespace of node names.
/// There is no parenting: a bundle's translate attributes are its world
/// position and a camera transform is its world pose.
///
/// Example:
///
/// ```
/// use solvekit_scene::{Scene, SceneQuery};
///
/// let mut scene = Scene::new();
/// let cam = scene.add_camera("camera1", "cameraShape1").unwrap();
/// let bnd = scene.add_bundle("bundle1").unwrap();
/// let mkr = scene.add_marker("marker1", &cam, Some(&bnd)).unwrap();
/// scene.set_marker_position(&mkr, 1, 0.0, 0.0).unwrap();
/// assert!(scene.marker_enabled(&mkr, 1));
/// assert!(!scene.marker_enabled(&mkr, 2));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    nodes: BTreeMap<String, NodeData>,
    attrs: BTreeMap<String, BTreeMap<String, AttrData>>,
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_node(&mut self, name: &str, data: NodeData) -> Result<(), SceneError> {
        if self.nodes.contains_key(name) {
            return Err(SceneError::DuplicateNode(name.to_string()));
        }
        self.nodes.insert(name.to_string(), data);
        Ok(())
    }

    fn insert_transform_attrs(&mut self, node: &str, translate: [f64; 3]) {
        let attrs = self.attrs.entry(node.to_string()).or_default();
        for (name, value) in TRANSLATE_ATTRS.iter().zip(translate) {
            attrs.insert(name.to_string(), AttrData::with_value(value));
        }
        for name in ROTATE_ATTRS {
            attrs.insert(name.to_string(), AttrData::angle(0.0));
        }
        for name in SCALE_ATTRS {
            attrs.insert(name.to_string(), AttrData::with_value(1.0));
        }
    }

    /// Add a camera with a 35mm lens on a 36x24mm film back.
    pub fn add_camera(&mut self, transform: &str, shape: &str) -> Result<Camera, SceneError> {
        if self.nodes.contains_key(shape) {
            return Err(SceneError::DuplicateNode(shape.to_string()));
        }
        self.insert_node(
            transform,
            NodeData::Camera {
                shape: shape.to_string(),
            },
        )?;
        self.insert_node(
            shape,
            NodeData::CameraShape {
                transform: transform.to_string(),
            },
        )?;
        self.insert_transform_attrs(transform, [0.0; 3]);

        let shape_attrs = self.attrs.entry(shape.to_string()).or_default();
        shape_attrs.insert(FOCAL_LENGTH_ATTR.to_string(), AttrData::with_value(35.0));
        shape_attrs.insert(FILM_WIDTH_ATTR.to_string(), AttrData::with_value(36.0));
        shape_attrs.insert(FILM_HEIGHT_ATTR.to_string(), AttrData::with_value(24.0));
        Ok(Camera::new(transform, shape))
    }

    /// Add a bundle at the origin.
    pub fn add_bundle(&mut self, node: &str) -> Result<Bundle, SceneError> {
        self.insert_node(node, NodeData::Bundle)?;
        self.insert_transform_attrs(node, [0.0; 3]);
        Ok(Bundle::new(node))
    }

    /// Add a marker seen through `camera`, measuring `bundle`.
    pub fn add_marker(
        &mut self,
        node: &str,
        camera: &Camera,
        bundle: Option<&Bundle>,
    ) -> Result<Marker, SceneError> {
        self.require_type(&camera.transform, ObjectType::Camera, "camera")?;
        if let Some(bnd) = bundle {
            self.require_type(&bnd.node, ObjectType::Bundle, "bundle")?;
        }
        self.insert_node(
            node,
            NodeData::Marker(MarkerData {
                camera: camera.transform.clone(),
                bundle: bundle.map(|b| b.node.clone()),
                samples: BTreeMap::new(),
            }),
        )?;
        Ok(Marker::new(node))
    }

    /// Add a node of no special type, e.g. a rig control.
    pub fn add_node(&mut self, node: &str) -> Result<(), SceneError> {
        self.insert_node(node, NodeData::Other)
    }

    /// Add or replace an attribute on an existing node.
    pub fn add_attr(&mut self, attr: &Attribute, data: AttrData) -> Result<(), SceneError> {
        if !self.nodes.contains_key(&attr.node) {
            return Err(SceneError::NodeNotFound(attr.node.clone()));
        }
        self.attrs
            .entry(attr.node.clone())
            .or_default()
            .insert(attr.attr.clone(), data);
        Ok(())
    }

    fn require_type(
        &self,
        node: &str,
        object_type: ObjectType,
        expected: &'static str,
    ) -> Result<(), SceneError> {
        match self.object_type(node) {
            ObjectType::Unknown => Err(SceneError::NodeNotFound(node.to_string())),
            t if t == object_type => Ok(()),
            _ => Err(SceneError::WrongNodeType {
                node: node.to_string(),
                expected,
            }),
        }
    }

    fn marker_data(&self, marker: &Marker) -> Result<&MarkerData, SceneError> {
        match self.nodes.get(&marker.node) {
            Some(NodeData::Marker(data)) => Ok(data),
            Some(_) => Err(SceneError::WrongNodeType {
                node: marker.node.clone(),
                expected: "marker",
            }),
            None => Err(SceneError::NodeNotFound(marker.node.clone())),
        }
    }

    fn marker_data_mut(&mut self, marker: &Marker) -> Result<&mut MarkerData, SceneError> {
        match self.nodes.get_mut(&marker.node) {
            Some(NodeData::Marker(data)) => Ok(data),
            Some(_) => Err(SceneError::WrongNodeType {
                node: marker.node.clone(),
                expected: "marker",
            }),
            None => Err(SceneError::NodeNotFound(marker.node.clone())),
        }
    }

    /// Set the tracked position of the marker on a frame, enabling it.
    pub fn set_marker_position(
        &mut self,
        marker: &Marker,
        frame: i32,
        x: f64,
        y: f64,
    ) -> Result<(), SceneError> {
        let data = self.marker_data_mut(marker)?;
        let sample = data.samples.entry(frame).or_insert(MarkerSample {
            x,
            y,
            enabled: true,
            weight: 1.0,
        });
        sample.x = x;
        sample.y = y;
        sample.enabled = true;
        Ok(())
    }

    /// Enable or disable an existing marker sample.
    pub fn set_marker_enabled(
        &mut self,
        marker: &Marker,
        frame: i32,
        enabled: bool,
    ) -> Result<(), SceneError> {
        let data = self.marker_data_mut(marker)?;
        match data.samples.get_mut(&frame) {
            Some(sample) => {
                sample.enabled = enabled;
                Ok(())
            }
            None if !enabled => Ok(()),
            None => Err(SceneError::AttributeNotFound(format!(
                "{}.enable[{}]",
                marker.node, frame
            ))),
        }
    }

    /// Set the weight of an existing marker sample.
    pub fn set_marker_weight(
        &mut self,
        marker: &Marker,
        frame: i32,
        weight: f64,
    ) -> Result<(), SceneError> {
        let data = self.marker_data_mut(marker)?;
        let sample = data.samples.get_mut(&frame).ok_or_else(|| {
            SceneError::AttributeNotFound(format!("{}.weight[{}]", marker.node, frame))
        })?;
        sample.weight = weight;
        Ok(())
    }

    /// Tracked position of the marker, `None` when disabled on the frame.
    pub fn marker_position(&self, marker: &Marker, frame: i32) -> Option<[f64; 2]> {
        let data = self.marker_data(marker).ok()?;
        data.samples
            .get(&frame)
            .filter(|s| s.enabled)
            .map(|s| [s.x, s.y])
    }

    /// All marker nodes in name order.
    pub fn markers(&self) -> Vec<Marker> {
        self.nodes
            .iter()
            .filter(|(_, data)| matches!(data, NodeData::Marker(_)))
            .map(|(name, _)| Marker::new(name.clone()))
            .collect()
    }

    /// All cameras in transform name order.
    pub fn cameras(&self) -> Vec<Camera> {
        self.nodes
            .iter()
            .filter_map(|(name, data)| match data {
                NodeData::Camera { shape } => Some(Camera::new(name.clone(), shape.clone())),
                _ => None,
            })
            .collect()
    }

    /// All bundles in name order.
    pub fn bundles(&self) -> Vec<Bundle> {
        self.nodes
            .iter()
            .filter(|(_, data)| matches!(data, NodeData::Bundle))
            .map(|(name, _)| Bundle::new(name.clone()))
            .collect()
    }

    /// Stored data of the attribute.
    pub fn attr_data(&self, attr: &Attribute) -> Result<&AttrData, SceneError> {
        self.attrs
            .get(&attr.node)
            .and_then(|a| a.get(&attr.attr))
            .ok_or_else(|| SceneError::AttributeNotFound(attr.name()))
    }

    /// Mutable stored data of the attribute.
    pub fn attr_data_mut(&mut self, attr: &Attribute) -> Result<&mut AttrData, SceneError> {
        self.attrs
            .get_mut(&attr.node)
            .and_then(|a| a.get_mut(&attr.attr))
            .ok_or_else(|| SceneError::AttributeNotFound(attr.name()))
    }

    /// Value of the attribute at a frame.
    pub fn value(&self, attr: &Attribute, frame: i32) -> Result<f64, SceneError> {
        Ok(self.attr_data(attr)?.evaluate(frame))
    }

    /// Set the attribute value at a frame.
    ///
    /// Animated attributes get a key on the frame, keeping the tangents of an
    /// existing key. Static attributes change their single value.
    pub fn set_value(&mut self, attr: &Attribute, frame: i32, value: f64) -> Result<(), SceneError> {
        let data = self.attr_data_mut(attr)?;
        if data.locked {
            return Err(SceneError::AttributeLocked(attr.name()));
        }
        if data.is_animated() {
            data.keys
                .entry(frame)
                .and_modify(|k| k.value = value)
                .or_insert_with(|| Keyframe::new(value));
        } else {
            data.value = value;
        }
        Ok(())
    }

    /// Set a key on the attribute, making it animated.
    pub fn set_keyframe(&mut self, attr: &Attribute, frame: i32, value: f64) -> Result<(), SceneError> {
        let data = self.attr_data_mut(attr)?;
        data.keys
            .entry(frame)
            .and_modify(|k| k.value = value)
            .or_insert_with(|| Keyframe::new(value));
        Ok(())
    }

    /// Lock or unlock the attribute.
    pub fn set_locked(&mut self, attr: &Attribute, locked: bool) -> Result<(), SceneError> {
        self.attr_data_mut(attr)?.locked = locked;
        Ok(())
    }

    /// Set single minimum and maximum bounds on the attribute.
    pub fn set_bounds(
        &mut self,
        attr: &Attribute,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<(), SceneError> {
        let data = self.attr_data_mut(attr)?;
        data.min = min.into_iter().collect();
        data.max = max.into_iter().collect();
        Ok(())
    }

    /// Remove keys in `[start, end]`, returning how many were removed.
    ///
    /// The last remaining value is kept as the static value when every key
    /// is removed.
    pub fn cut_keys(&mut self, attr: &Attribute, start: i32, end: i32) -> Result<usize, SceneError> {
        let data = self.attr_data_mut(attr)?;
        let frames: Vec<i32> = data.keys.range(start..=end).map(|(f, _)| *f).collect();
        let mut last = None;
        for f in &frames {
            last = data.keys.remove(f).map(|k| k.value);
        }
        if data.keys.is_empty() {
            if let Some(value) = last {
                data.value = value;
            }
        }
        Ok(frames.len())
    }

    /// Change the tangents of keys in `[start, end]`.
    pub fn set_key_tangents(
        &mut self,
        attr: &Attribute,
        start: i32,
        end: i32,
        in_tangent: TangentType,
        out_tangent: TangentType,
    ) -> Result<usize, SceneError> {
        let data = self.attr_data_mut(attr)?;
        let mut count = 0;
        for (_, key) in data.keys.range_mut(start..=end) {
            key.in_tangent = in_tangent;
            key.out_tangent = out_tangent;
            count += 1;
        }
        Ok(count)
    }

    fn transform_values(&self, node: &str, names: [&str; 3], frame: i32) -> Result<[f64; 3], SceneError> {
        let mut out = [0.0; 3];
        for (v, name) in out.iter_mut().zip(names) {
            *v = self.value(&Attribute::new(node, name), frame)?;
        }
        Ok(out)
    }

    /// Evaluate the camera at a frame.
    pub fn camera_pose(&self, camera: &Camera, frame: i32) -> Result<CameraPose, SceneError> {
        let translate = self.transform_values(&camera.transform, TRANSLATE_ATTRS, frame)?;
        let rotate = self.transform_values(&camera.transform, ROTATE_ATTRS, frame)?;
        let focal = self.value(&Attribute::new(&camera.shape, FOCAL_LENGTH_ATTR), frame)?;
        let width = self.value(&Attribute::new(&camera.shape, FILM_WIDTH_ATTR), frame)?;
        let height = self.value(&Attribute::new(&camera.shape, FILM_HEIGHT_ATTR), frame)?;
        Ok(CameraPose::new(translate, rotate, focal, width, height))
    }

    /// World position of the bundle at a frame.
    pub fn bundle_position(&self, bundle: &Bundle, frame: i32) -> Result<[f64; 3], SceneError> {
        self.transform_values(&bundle.node, TRANSLATE_ATTRS, frame)
    }

    /// Set the world position of the bundle at a frame.
    ///
    /// Animated translates get a key on the frame. Nothing is changed when
    /// any translate attribute is locked.
    pub fn set_bundle_position(
        &mut self,
        bundle: &Bundle,
        frame: i32,
        position: [f64; 3],
    ) -> Result<(), SceneError> {
        let attrs = TRANSLATE_ATTRS.map(|name| Attribute::new(&bundle.node, name));
        for attr in &attrs {
            if self.attr_data(attr)?.locked {
                return Err(SceneError::AttributeLocked(attr.name()));
            }
        }
        for (attr, value) in attrs.iter().zip(position) {
            self.set_value(attr, frame, value)?;
        }
        Ok(())
    }

    /// Set the static world position of the camera.
    pub fn set_camera_position(&mut self, camera: &Camera, position: [f64; 3]) -> Result<(), SceneError> {
        for (name, value) in TRANSLATE_ATTRS.iter().zip(position) {
            self.attr_data_mut(&Attribute::new(&camera.transform, *name))?.value = value;
        }
        Ok(())
    }

    /// Decode a scene from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self, SceneError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode the scene as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a scene from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loaded scene file {}", path.as_ref().display());
        Self::from_json_str(&text)
    }

    /// Write the scene to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        std::fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }
}

impl SceneQuery for Scene {
    fn object_type(&self, node: &str) -> ObjectType {
        match self.nodes.get(node) {
            Some(NodeData::Camera { .. }) | Some(NodeData::CameraShape { .. }) => ObjectType::Camera,
            Some(NodeData::Bundle) => ObjectType::Bundle,
            Some(NodeData::Marker(_)) => ObjectType::Marker,
            Some(NodeData::Other) => ObjectType::Other,
            None => ObjectType::Unknown,
        }
    }

    fn attr_state(&self, attr: &Attribute) -> AttrState {
        match self.attr_data(attr) {
            Ok(data) if data.locked => AttrState::Locked,
            Ok(data) if data.is_animated() => AttrState::Animated,
            Ok(_) => AttrState::Static,
            Err(_) => AttrState::Invalid,
        }
    }

    fn attr_kind(&self, attr: &Attribute) -> AttrKind {
        self.attr_data(attr).map(|d| d.kind).unwrap_or_default()
    }

    fn attr_min_values(&self, attr: &Attribute) -> Vec<f64> {
        self.attr_data(attr).map(|d| d.min.clone()).unwrap_or_default()
    }

    fn attr_max_values(&self, attr: &Attribute) -> Vec<f64> {
        self.attr_data(attr).map(|d| d.max.clone()).unwrap_or_default()
    }

    fn marker_enabled(&self, marker: &Marker, frame: i32) -> bool {
        self.marker_position(marker, frame).is_some()
    }

    fn marker_weight(&self, marker: &Marker, frame: i32) -> f64 {
        self.marker_data(marker)
            .ok()
            .and_then(|d| d.samples.get(&frame))
            .filter(|s| s.enabled)
            .map_or(0.0, |s| s.weight)
    }

    fn marker_enabled_frames(
        &self,
        marker: &Marker,
        start: Option<i32>,
        end: Option<i32>,
    ) -> Vec<i32> {
        let Ok(data) = self.marker_data(marker) else {
            return Vec::new();
        };
        let lower = start.map_or(Bound::Unbounded, Bound::Included);
        let upper = end.map_or(Bound::Unbounded, Bound::Included);
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Vec::new();
            }
        }
        data.samples
            .range((lower, upper))
            .filter(|(_, s)| s.enabled)
            .map(|(f, _)| *f)
            .collect()
    }

    fn marker_camera(&self, marker: &Marker) -> Option<Camera> {
        let data = self.marker_data(marker).ok()?;
        match self.nodes.get(&data.camera) {
            Some(NodeData::Camera { shape }) => Some(Camera::new(data.camera.clone(), shape.clone())),
            _ => None,
        }
    }

    fn marker_bundle(&self, marker: &Marker) -> Option<Bundle> {
        let data = self.marker_data(marker).ok()?;
        let node = data.bundle.as_ref()?;
        match self.nodes.get(node) {
            Some(NodeData::Bundle) => Some(Bundle::new(node.clone())),
            _ => None,
        }
    }

    fn bundle_markers(&self, bundle: &Bundle) -> Vec<Marker> {
        self.nodes
            .iter()
            .filter_map(|(name, data)| match data {
                NodeData::Marker(m) if m.bundle.as_deref() == Some(bundle.node.as_str()) => {
                    Some(Marker::new(name.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn affects(&self, markers: &[Marker], attrs: &[Attribute]) -> Vec<Vec<bool>> {
        markers
            .iter()
            .map(|marker| {
                let camera = self.marker_camera(marker);
                let bundle = self.marker_bundle(marker);
                attrs
                    .iter()
                    .map(|attr| {
                        let on_bundle = bundle.as_ref().is_some_and(|b| b.node == attr.node);
                        let on_camera = camera
                            .as_ref()
                            .is_some_and(|c| c.transform == attr.node || c.shape == attr.node);
                        on_bundle || on_camera
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simple_scene() -> Result<(Scene, Camera, Bundle, Marker), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        Ok((scene, cam, bnd, mkr))
    }

    #[test]
    fn test_object_types() -> Result<(), SceneError> {
        let (scene, cam, bnd, mkr) = simple_scene()?;
        assert_eq!(scene.object_type(&cam.transform), ObjectType::Camera);
        assert_eq!(scene.object_type(&cam.shape), ObjectType::Camera);
        assert_eq!(scene.object_type(&bnd.node), ObjectType::Bundle);
        assert_eq!(scene.object_type(&mkr.node), ObjectType::Marker);
        assert_eq!(scene.object_type("missing"), ObjectType::Unknown);
        Ok(())
    }

    #[test]
    fn test_duplicate_node() -> Result<(), SceneError> {
        let (mut scene, ..) = simple_scene()?;
        assert!(matches!(
            scene.add_bundle("bundle1"),
            Err(SceneError::DuplicateNode(_))
        ));
        Ok(())
    }

    #[test]
    fn test_attr_state() -> Result<(), SceneError> {
        let (mut scene, _, bnd, _) = simple_scene()?;
        let tx = Attribute::new(&bnd.node, "translateX");
        let ty = Attribute::new(&bnd.node, "translateY");
        let tz = Attribute::new(&bnd.node, "translateZ");
        scene.set_keyframe(&ty, 1, 2.0)?;
        scene.set_locked(&tz, true)?;
        assert_eq!(scene.attr_state(&tx), AttrState::Static);
        assert_eq!(scene.attr_state(&ty), AttrState::Animated);
        assert_eq!(scene.attr_state(&tz), AttrState::Locked);
        assert_eq!(
            scene.attr_state(&Attribute::new(&bnd.node, "nope")),
            AttrState::Invalid
        );
        Ok(())
    }

    #[test]
    fn test_linear_and_step_keys() {
        let mut data = AttrData::default();
        data.keys.insert(0, Keyframe::new(0.0));
        data.keys.insert(10, Keyframe::new(10.0));
        for key in data.keys.values_mut() {
            key.in_tangent = TangentType::Linear;
            key.out_tangent = TangentType::Linear;
        }
        assert_relative_eq!(data.evaluate(5), 5.0);
        assert_relative_eq!(data.evaluate(-3), 0.0);
        assert_relative_eq!(data.evaluate(12), 10.0);

        if let Some(key) = data.keys.get_mut(&0) {
            key.out_tangent = TangentType::Step;
        }
        assert_relative_eq!(data.evaluate(9), 0.0);
    }

    #[test]
    fn test_smooth_keys_pass_through_keys() {
        let mut data = AttrData::default();
        data.keys.insert(0, Keyframe::new(0.0));
        data.keys.insert(5, Keyframe::new(4.0));
        data.keys.insert(10, Keyframe::new(0.0));
        assert_relative_eq!(data.evaluate(5), 4.0);
        // symmetric curve peaks at the middle key
        assert!(data.evaluate(4) < 4.0);
        assert_relative_eq!(data.evaluate(4), data.evaluate(6), epsilon = 1e-12);
    }

    #[test]
    fn test_cut_keys_keeps_last_value() -> Result<(), SceneError> {
        let (mut scene, _, bnd, _) = simple_scene()?;
        let tx = Attribute::new(&bnd.node, "translateX");
        scene.set_keyframe(&tx, 1, 1.0)?;
        scene.set_keyframe(&tx, 2, 2.0)?;
        scene.set_keyframe(&tx, 3, 3.0)?;
        assert_eq!(scene.cut_keys(&tx, 2, 2)?, 1);
        assert_eq!(scene.attr_state(&tx), AttrState::Animated);
        assert_eq!(scene.cut_keys(&tx, 1, 3)?, 2);
        assert_eq!(scene.attr_state(&tx), AttrState::Static);
        assert_relative_eq!(scene.value(&tx, 100)?, 3.0);
        Ok(())
    }

    #[test]
    fn test_marker_frames_and_affects() -> Result<(), SceneError> {
        let (mut scene, cam, bnd, mkr) = simple_scene()?;
        for f in [1, 2, 3, 5] {
            scene.set_marker_position(&mkr, f, 0.1, 0.2)?;
        }
        scene.set_marker_enabled(&mkr, 3, false)?;
        assert_eq!(scene.marker_enabled_frames(&mkr, None, None), vec![1, 2, 5]);
        assert_eq!(scene.marker_enabled_frames(&mkr, Some(2), Some(4)), vec![2]);
        assert_relative_eq!(scene.marker_weight(&mkr, 3), 0.0);
        assert_relative_eq!(scene.marker_weight(&mkr, 2), 1.0);

        scene.add_node("rig")?;
        let attrs = vec![
            Attribute::new(&bnd.node, "translateX"),
            Attribute::new(&cam.shape, FOCAL_LENGTH_ATTR),
            Attribute::new("rig", "translateX"),
        ];
        let affects = scene.affects(&[mkr], &attrs);
        assert_eq!(affects, vec![vec![true, true, false]]);
        Ok(())
    }

    #[test]
    fn test_json_roundtrip() -> Result<(), SceneError> {
        let (mut scene, _, bnd, mkr) = simple_scene()?;
        scene.set_marker_position(&mkr, 1, 0.25, -0.1)?;
        scene.set_keyframe(&Attribute::new(&bnd.node, "translateY"), 4, 1.5)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scene.json");
        scene.save(&path)?;
        let loaded = Scene::load(&path)?;
        assert_eq!(loaded, scene);
        assert_eq!(loaded.marker_position(&mkr, 1), Some([0.25, -0.1]));
        Ok(())
    }

    #[test]
    fn test_json_marker_samples_reload() -> Result<(), SceneError> {
        let (mut scene, _, _, mkr) = simple_scene()?;
        for f in [1, 2, 10] {
            scene.set_marker_position(&mkr, f, 0.1 * f as f64, 0.0)?;
        }
        scene.set_marker_enabled(&mkr, 2, false)?;
        let text = scene.to_json_string()?;
        let loaded = Scene::from_json_str(&text)?;
        assert_eq!(loaded.marker_position(&mkr, 10), Some([1.0, 0.0]));
        assert!(!loaded.marker_enabled(&mkr, 2));
        assert_eq!(loaded.to_json_string()?, text);
        Ok(())
    }

    #[test]
    fn test_bundle_position_respects_locks() -> Result<(), SceneError> {
        let (mut scene, _, bnd, _) = simple_scene()?;
        let tx = Attribute::new(&bnd.node, "translateX");
        let tz = Attribute::new(&bnd.node, "translateZ");
        scene.set_keyframe(&tx, 1, 0.0)?;
        scene.set_keyframe(&tx, 10, 0.0)?;
        scene.set_bundle_position(&bnd, 5, [2.0, 3.0, -4.0])?;
        assert_relative_eq!(scene.value(&tx, 5)?, 2.0);
        assert_eq!(scene.bundle_position(&bnd, 5)?, [2.0, 3.0, -4.0]);

        scene.set_locked(&tz, true)?;
        let result = scene.set_bundle_position(&bnd, 5, [7.0, 7.0, 7.0]);
        assert!(matches!(result, Err(SceneError::AttributeLocked(_))));
        assert_eq!(scene.bundle_position(&bnd, 5)?, [2.0, 3.0, -4.0]);
        Ok(())
    }
}
