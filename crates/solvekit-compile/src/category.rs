use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use solvekit_scene::{Attribute, ObjectType, SceneQuery};

/// Bundle attributes solved as a bundle transform.
pub const BUNDLE_TRANSFORM_ATTRS: [&str; 3] = ["translateX", "translateY", "translateZ"];

/// Camera shape attributes solved as camera intrinsics.
pub const CAMERA_INTRINSIC_ATTRS: [&str; 3] = [
    "focalLength",
    "horizontalFilmAperture",
    "verticalFilmAperture",
];

/// Camera transform attributes solved as a camera transform.
pub const CAMERA_TRANSFORM_ATTRS: [&str; 9] = [
    "translateX",
    "translateY",
    "translateZ",
    "rotateX",
    "rotateY",
    "rotateZ",
    "scaleX",
    "scaleY",
    "scaleZ",
];

/// Solve category of an attribute.
///
/// The declaration order is the order categories are visited when a problem
/// is split into attribute blocks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttrCategory {
    /// Any attribute without a more specific category.
    Regular,
    /// Bundle translation.
    BundleTransform,
    /// Camera translation, rotation and scale.
    CameraTransform,
    /// Camera focal length and film back.
    CameraIntrinsic,
    /// Lens distortion parameters. No attribute is classified into this
    /// category yet.
    LensDistortion,
}

impl AttrCategory {
    /// All categories in visiting order.
    pub const ALL: [AttrCategory; 5] = [
        AttrCategory::Regular,
        AttrCategory::BundleTransform,
        AttrCategory::CameraTransform,
        AttrCategory::CameraIntrinsic,
        AttrCategory::LensDistortion,
    ];
}

/// Attributes of one category, grouped by owning node in first-seen order.
pub type NodeGroups = Vec<(String, Vec<Attribute>)>;

/// Classify an attribute by the type of its node and its name.
///
/// # Arguments
///
/// * `scene` - The scene to query node types from.
/// * `attr` - The attribute to classify.
///
/// # Returns
///
/// The solve category of the attribute.
pub fn classify(scene: &dyn SceneQuery, attr: &Attribute) -> AttrCategory {
    let name = attr.attr.as_str();
    match scene.object_type(&attr.node) {
        ObjectType::Bundle if BUNDLE_TRANSFORM_ATTRS.contains(&name) => {
            AttrCategory::BundleTransform
        }
        ObjectType::Camera if CAMERA_TRANSFORM_ATTRS.contains(&name) => {
            AttrCategory::CameraTransform
        }
        ObjectType::Camera if CAMERA_INTRINSIC_ATTRS.contains(&name) => {
            AttrCategory::CameraIntrinsic
        }
        _ => AttrCategory::Regular,
    }
}

/// Group attributes by category, then by owning node.
///
/// Attribute order within a node and node order within a category follow
/// the input order. Categories with no attributes are absent.
pub fn categorise(
    scene: &dyn SceneQuery,
    attrs: &[Attribute],
) -> BTreeMap<AttrCategory, NodeGroups> {
    let mut categories: BTreeMap<AttrCategory, NodeGroups> = BTreeMap::new();
    for attr in attrs {
        let groups = categories.entry(classify(scene, attr)).or_default();
        match groups.iter_mut().find(|(node, _)| *node == attr.node) {
            Some((_, group)) => group.push(attr.clone()),
            None => groups.push((attr.node.clone(), vec![attr.clone()])),
        }
    }
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use solvekit_scene::{Scene, SceneError};

    fn scene() -> Result<Scene, SceneError> {
        let mut scene = Scene::new();
        scene.add_camera("camera1", "cameraShape1")?;
        scene.add_bundle("bundle1")?;
        scene.add_bundle("bundle2")?;
        scene.add_node("rig")?;
        Ok(scene)
    }

    #[test]
    fn test_classify() -> Result<(), SceneError> {
        let scene = scene()?;
        let cases = [
            ("bundle1", "translateX", AttrCategory::BundleTransform),
            ("bundle1", "rotateX", AttrCategory::Regular),
            ("camera1", "rotateY", AttrCategory::CameraTransform),
            ("cameraShape1", "focalLength", AttrCategory::CameraIntrinsic),
            ("rig", "translateX", AttrCategory::Regular),
            ("missing", "translateX", AttrCategory::Regular),
        ];
        for (node, name, expected) in cases {
            let attr = Attribute::new(node, name);
            assert_eq!(classify(&scene, &attr), expected, "{}", attr.name());
            // stable across calls
            assert_eq!(classify(&scene, &attr), classify(&scene, &attr));
        }
        Ok(())
    }

    #[test]
    fn test_categorise_partitions() -> Result<(), SceneError> {
        let scene = scene()?;
        let attrs = vec![
            Attribute::new("bundle2", "translateX"),
            Attribute::new("camera1", "translateZ"),
            Attribute::new("bundle1", "translateY"),
            Attribute::new("bundle2", "translateY"),
            Attribute::new("cameraShape1", "focalLength"),
        ];
        let categories = categorise(&scene, &attrs);
        assert!(!categories.contains_key(&AttrCategory::Regular));
        assert!(!categories.contains_key(&AttrCategory::LensDistortion));

        let bundles = &categories[&AttrCategory::BundleTransform];
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].0, "bundle2");
        assert_eq!(
            bundles[0].1,
            vec![
                Attribute::new("bundle2", "translateX"),
                Attribute::new("bundle2", "translateY"),
            ]
        );
        assert_eq!(bundles[1].0, "bundle1");

        // every attribute lands in exactly one group
        let total: usize = categories
            .values()
            .flat_map(|groups| groups.iter().map(|(_, g)| g.len()))
            .sum();
        assert_eq!(total, attrs.len());
        Ok(())
    }
}
