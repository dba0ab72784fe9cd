use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solvekit_scene::{AttrState, Attribute, Bundle, Frame, Marker, ObjectType, SceneQuery};

use crate::{
    action::FUNC_TRIANGULATE_BUNDLE, category::BUNDLE_TRANSFORM_ATTRS, Action, ActionIter,
    ActionPair, FrameList, SolverCompile, SolverError,
};

/// A marker observation used to triangulate a bundle, encoded as
/// `(marker node, camera transform node, frame numbers)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRays(pub String, pub String, pub Vec<i32>);

/// Re-compute unlocked bundle positions from the rays of their markers.
///
/// Produces one `triangulate_bundle` action per bundle whose three translate
/// attributes are all being solved. There are no validate actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverTriangulate {
    name: String,
    enabled: bool,
    root_frame_list: FrameList,
}

impl Default for SolverTriangulate {
    fn default() -> Self {
        Self {
            name: "solver".to_string(),
            enabled: true,
            root_frame_list: FrameList::new(),
        }
    }
}

impl SolverTriangulate {
    /// Create a triangulation strategy without root frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the strategy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Is the strategy used when compiling a collection?
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the strategy.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Frames preferred for triangulation rays.
    pub fn root_frame_list(&self) -> &FrameList {
        &self.root_frame_list
    }

    /// Mutable frames preferred for triangulation rays.
    pub fn root_frame_list_mut(&mut self) -> &mut FrameList {
        &mut self.root_frame_list
    }

    /// Frames a marker contributes rays on.
    ///
    /// The marker's enabled root frames when there are at least two of them,
    /// otherwise its first and last enabled frames.
    fn marker_frames(&self, scene: &dyn SceneQuery, marker: &Marker) -> Vec<i32> {
        let root: Vec<i32> = self
            .root_frame_list
            .iter()
            .map(|f| f.number)
            .filter(|&f| scene.marker_enabled(marker, f))
            .collect();
        if root.len() >= 2 {
            return root;
        }
        let enabled = scene.marker_enabled_frames(marker, None, None);
        match (enabled.first(), enabled.last()) {
            (Some(&first), Some(&last)) if first != last => vec![first, last],
            (Some(&first), _) => vec![first],
            _ => Vec::new(),
        }
    }

    /// Bundles with all translate attributes in `attrs` and unlocked, in
    /// attribute order.
    fn bundles(
        &self,
        scene: &dyn SceneQuery,
        markers: &[Marker],
        attrs: &[Attribute],
    ) -> Vec<Bundle> {
        let marker_bundles: Vec<Bundle> =
            markers.iter().filter_map(|m| scene.marker_bundle(m)).collect();

        let mut counts: Vec<(String, usize)> = Vec::new();
        for attr in attrs {
            if !BUNDLE_TRANSFORM_ATTRS.contains(&attr.attr.as_str())
                || !marker_bundles.iter().any(|b| b.node == attr.node)
                || scene.object_type(&attr.node) != ObjectType::Bundle
                || scene.attr_state(attr) == AttrState::Locked
            {
                continue;
            }
            match counts.iter_mut().find(|(node, _)| *node == attr.node) {
                Some((_, count)) => *count += 1,
                None => counts.push((attr.node.clone(), 1)),
            }
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count == BUNDLE_TRANSFORM_ATTRS.len())
            .map(|(node, _)| Bundle::new(node))
            .collect()
    }

    /// Compile every triangulation action.
    pub fn compile_pairs(
        &self,
        scene: &dyn SceneQuery,
        markers: &[Marker],
        attrs: &[Attribute],
    ) -> Result<Vec<ActionPair>, SolverError> {
        let mut pairs = Vec::new();
        for bundle in self.bundles(scene, markers, attrs) {
            let rays: Vec<MarkerRays> = scene
                .bundle_markers(&bundle)
                .into_iter()
                .filter(|m| markers.contains(m))
                .filter_map(|m| {
                    let camera = scene.marker_camera(&m)?;
                    let frames = self.marker_frames(scene, &m);
                    (!frames.is_empty()).then(|| MarkerRays(m.node, camera.transform, frames))
                })
                .collect();
            log::debug!("Triangulate bundle {} from {} markers", bundle.node, rays.len());

            let args = vec![Value::from(bundle.node), serde_json::to_value(&rays)?];
            pairs.push((Action::new(FUNC_TRIANGULATE_BUNDLE, args, Map::new()), None));
        }
        Ok(pairs)
    }
}

impl SolverCompile for SolverTriangulate {
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        _with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError> {
        let pairs = self.compile_pairs(scene, markers, attrs)?;
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }

    fn frame_list(&self) -> Vec<Frame> {
        vec![Frame::new(1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use solvekit_scene::Scene;

    #[test]
    fn test_triangulate_actions() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd1 = scene.add_bundle("bundle1")?;
        let bnd2 = scene.add_bundle("bundle2")?;
        let mkr1 = scene.add_marker("marker1", &cam, Some(&bnd1))?;
        let mkr2 = scene.add_marker("marker2", &cam, Some(&bnd2))?;
        for f in 1..=10 {
            scene.set_marker_position(&mkr1, f, 0.0, 0.0)?;
            scene.set_marker_position(&mkr2, f, 0.0, 0.0)?;
        }
        let attrs: Vec<Attribute> = ["translateX", "translateY", "translateZ"]
            .iter()
            .map(|a| Attribute::new("bundle1", *a))
            .chain([Attribute::new("bundle2", "translateX")])
            .collect();

        let mut sol = SolverTriangulate::new();
        let pairs = sol.compile_pairs(&scene, &[mkr1.clone(), mkr2.clone()], &attrs)?;
        // bundle2 is only partly solved
        assert_eq!(pairs.len(), 1);
        let (action, vaction) = &pairs[0];
        assert!(vaction.is_none());
        assert_eq!(action.func, FUNC_TRIANGULATE_BUNDLE);
        assert_eq!(
            action.args,
            vec![json!("bundle1"), json!([["marker1", "camera1", [1, 10]]])]
        );

        sol.root_frame_list_mut().set([Frame::new(2), Frame::new(5), Frame::new(20)])?;
        let pairs = sol.compile_pairs(&scene, &[mkr1, mkr2], &attrs)?;
        assert_eq!(pairs[0].0.args[1], json!([["marker1", "camera1", [2, 5]]]));
        Ok(())
    }

    #[test]
    fn test_locked_bundle_not_triangulated() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        scene.set_marker_position(&mkr, 1, 0.0, 0.0)?;
        scene.set_marker_position(&mkr, 5, 0.0, 0.0)?;
        let attrs: Vec<Attribute> = ["translateX", "translateY", "translateZ"]
            .iter()
            .map(|a| Attribute::new("bundle1", *a))
            .collect();

        let sol = SolverTriangulate::new();
        assert_eq!(sol.compile_pairs(&scene, &[mkr.clone()], &attrs)?.len(), 1);
        scene.set_locked(&attrs[2], true)?;
        assert!(sol.compile_pairs(&scene, &[mkr], &attrs)?.is_empty());
        Ok(())
    }
}
