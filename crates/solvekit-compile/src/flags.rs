//! Solver arguments resolved from scene state.
//!
//! Flags are tuple structs so they encode as plain JSON arrays inside an
//! [`crate::Action`], and decode back on the executor side.

use serde::{Deserialize, Serialize};
use solvekit_scene::{AttrKind, AttrState, Attribute, Marker, SceneQuery};

use crate::SolverError;

/// Sentinel used for absent values in attribute flags.
pub const NONE_VALUE: &str = "None";

/// Offset applied to angle attributes, one full turn in degrees.
pub const ANGLE_OFFSET: f64 = 360.0;

/// A marker resolved to `(marker node, camera shape node, bundle node)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerFlag(pub String, pub String, pub String);

/// A camera resolved to `(transform node, shape node)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFlag(pub String, pub String);

/// An attribute resolved to `(name, min, max, offset, scale)`.
///
/// Numbers are stored as strings, with [`NONE_VALUE`] when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrFlag(
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
);

impl AttrFlag {
    /// The full `node.attr` name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Minimum bound, if any.
    pub fn min_value(&self) -> Option<f64> {
        parse_optional(&self.1)
    }

    /// Maximum bound, if any.
    pub fn max_value(&self) -> Option<f64> {
        parse_optional(&self.2)
    }

    /// Unit offset, if any.
    pub fn offset(&self) -> Option<f64> {
        parse_optional(&self.3)
    }
}

/// Format an optional number for a flag, e.g. `360.0` or `None`.
pub fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:?}"),
        None => NONE_VALUE.to_string(),
    }
}

fn parse_optional(text: &str) -> Option<f64> {
    if text == NONE_VALUE {
        return None;
    }
    text.parse().ok()
}

/// Resolve markers into marker and camera flags.
///
/// Markers without a bundle or camera are skipped with a warning. Cameras
/// are listed once each, in the order first seen.
pub fn markers_and_cameras(
    scene: &dyn SceneQuery,
    markers: &[Marker],
) -> (Vec<MarkerFlag>, Vec<CameraFlag>) {
    let mut marker_flags = Vec::new();
    let mut camera_flags: Vec<CameraFlag> = Vec::new();
    for marker in markers {
        let Some(bundle) = scene.marker_bundle(marker) else {
            log::warn!("Cannot find bundle from marker, skipping; marker={}", marker.node);
            continue;
        };
        let Some(camera) = scene.marker_camera(marker) else {
            log::warn!("Cannot find camera from marker, skipping; marker={}", marker.node);
            continue;
        };
        marker_flags.push(MarkerFlag(
            marker.node.clone(),
            camera.shape.clone(),
            bundle.node,
        ));
        if !camera_flags.iter().any(|c| c.1 == camera.shape) {
            camera_flags.push(CameraFlag(camera.transform, camera.shape));
        }
    }
    (marker_flags, camera_flags)
}

fn single_bound(
    user: Option<f64>,
    host: Vec<f64>,
    attr: &Attribute,
    which: &str,
) -> Result<Option<f64>, SolverError> {
    if user.is_some() {
        return Ok(user);
    }
    match host.as_slice() {
        [] => Ok(None),
        [value] => Ok(Some(*value)),
        _ => Err(SolverError::NotValid(format!(
            "Cannot handle attributes with multiple {which} values; node={} attr={}",
            attr.node, attr.attr
        ))),
    }
}

/// Resolve attributes into attribute flags.
///
/// Locked and invalid attributes are never included. Animated and static
/// attributes are included when `use_animated` and `use_static` allow it.
///
/// # Errors
///
/// Returns [`SolverError::NotValid`] if the scene reports more than one
/// minimum or maximum value for an attribute.
pub fn attributes(
    scene: &dyn SceneQuery,
    attrs: &[Attribute],
    use_animated: bool,
    use_static: bool,
) -> Result<Vec<AttrFlag>, SolverError> {
    let mut flags = Vec::new();
    for attr in attrs {
        let state = scene.attr_state(attr);
        let used = match state {
            AttrState::Animated => use_animated,
            AttrState::Static => use_static,
            AttrState::Locked | AttrState::Invalid => false,
        };
        if !used {
            continue;
        }

        let min_value = single_bound(attr.min_value, scene.attr_min_values(attr), attr, "minimum")?;
        let max_value = single_bound(attr.max_value, scene.attr_max_values(attr), attr, "maximum")?;
        let offset = match scene.attr_kind(attr) {
            AttrKind::Angle => Some(ANGLE_OFFSET),
            AttrKind::Linear => None,
        };
        flags.push(AttrFlag(
            attr.name(),
            format_optional(min_value),
            format_optional(max_value),
            format_optional(offset),
            format_optional(None),
        ));
    }
    Ok(flags)
}

/// Names of the existing unlocked attributes, for key editing actions.
pub fn unlocked_attr_names(scene: &dyn SceneQuery, attrs: &[Attribute]) -> Vec<String> {
    attrs
        .iter()
        .filter(|a| matches!(scene.attr_state(a), AttrState::Static | AttrState::Animated))
        .map(|a| a.name())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solvekit_scene::{Scene, SceneError};

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(360.0)), "360.0");
        assert_eq!(format_optional(Some(-0.5)), "-0.5");
        assert_eq!(format_optional(None), "None");
    }

    #[test]
    fn test_markers_without_bundle_skipped() -> Result<(), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr1 = scene.add_marker("marker1", &cam, Some(&bnd))?;
        let mkr2 = scene.add_marker("marker2", &cam, None)?;
        let mkr3 = scene.add_marker("marker3", &cam, Some(&bnd))?;

        let (markers, cameras) = markers_and_cameras(&scene, &[mkr1, mkr2, mkr3]);
        assert_eq!(
            markers,
            vec![
                MarkerFlag("marker1".into(), "cameraShape1".into(), "bundle1".into()),
                MarkerFlag("marker3".into(), "cameraShape1".into(), "bundle1".into()),
            ]
        );
        assert_eq!(
            cameras,
            vec![CameraFlag("camera1".into(), "cameraShape1".into())]
        );
        Ok(())
    }

    #[test]
    fn test_unlocked_attr_names() -> Result<(), SceneError> {
        let mut scene = Scene::new();
        scene.add_bundle("bundle1")?;
        let tx = Attribute::new("bundle1", "translateX");
        let ty = Attribute::new("bundle1", "translateY");
        let tz = Attribute::new("bundle1", "translateZ");
        scene.set_keyframe(&ty, 1, 0.0)?;
        scene.set_locked(&tz, true)?;
        let missing = Attribute::new("bundle1", "missingAttr");
        let names = unlocked_attr_names(&scene, &[tx, missing, ty, tz]);
        assert_eq!(names, vec!["bundle1.translateX", "bundle1.translateY"]);
        Ok(())
    }

    #[test]
    fn test_attribute_flags() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        scene.add_camera("camera1", "cameraShape1")?;
        let rx = Attribute::new("camera1", "rotateX");
        let tx = Attribute::new("camera1", "translateX").with_bounds(Some(-1.0), None);
        let ty = Attribute::new("camera1", "translateY");
        let tz = Attribute::new("camera1", "translateZ");
        let focal = Attribute::new("cameraShape1", "focalLength");
        scene.set_locked(&ty, true)?;
        scene.set_keyframe(&tz, 1, 0.0)?;
        scene.set_bounds(&focal, Some(1.0), Some(1000.0))?;

        let all = [rx.clone(), tx.clone(), ty.clone(), tz.clone(), focal.clone()];
        let flags = attributes(&scene, &all, true, true)?;
        let names: Vec<&str> = flags.iter().map(|f| f.name()).collect();
        assert_eq!(
            names,
            vec![
                "camera1.rotateX",
                "camera1.translateX",
                "camera1.translateZ",
                "cameraShape1.focalLength",
            ]
        );
        assert_eq!(flags[0].3, "360.0");
        assert_eq!(flags[1].1, "-1.0");
        assert_eq!(flags[1].2, "None");
        assert_eq!(flags[3].min_value(), Some(1.0));
        assert_eq!(flags[3].max_value(), Some(1000.0));
        assert_eq!(flags[3].4, "None");

        let animated = attributes(&scene, &all, true, false)?;
        assert_eq!(animated.len(), 1);
        assert_eq!(animated[0].name(), "camera1.translateZ");

        if let Ok(data) = scene.attr_data_mut(&focal) {
            data.min = vec![1.0, 2.0];
        }
        assert!(matches!(
            attributes(&scene, &[focal], true, true),
            Err(SolverError::NotValid(_))
        ));
        Ok(())
    }
}
