use faer::prelude::SpSolver;
use serde::de::DeserializeOwned;
use solvekit_compile::{triangulate::MarkerRays, Action};
use solvekit_scene::{Attribute, Bundle, Marker, Scene, SceneQuery, TangentType};

use crate::{problem::kwarg, ExecError};

/// Smallest determinant accepted for the triangulation normal equations.
const TRIANGULATE_MIN_DET: f64 = 1e-9;

fn arg<T: DeserializeOwned>(action: &Action, index: usize) -> Result<T, ExecError> {
    let value = action.args.get(index).ok_or_else(|| {
        ExecError::InvalidArgument(format!("{} is missing argument {index}", action.func))
    })?;
    serde_json::from_value(value.clone())
        .map_err(|e| ExecError::InvalidArgument(format!("{} argument {index}: {e}", action.func)))
}

fn attr_args(action: &Action) -> Result<Vec<Attribute>, ExecError> {
    action
        .args
        .iter()
        .map(|value| {
            value
                .as_str()
                .and_then(Attribute::from_name)
                .ok_or_else(|| ExecError::InvalidArgument(format!("bad attribute {value}")))
        })
        .collect()
}

fn time_range(action: &Action) -> Result<(i32, i32), ExecError> {
    let [start, end]: [i32; 2] = kwarg(action, "time")?
        .ok_or_else(|| ExecError::InvalidArgument(format!("{} has no time", action.func)))?;
    Ok((start, end))
}

fn det3(m: &faer::Mat<f64>) -> f64 {
    let a = |i, j| m.read(i, j);
    a(0, 0) * (a(1, 1) * a(2, 2) - a(1, 2) * a(2, 1))
        - a(0, 1) * (a(1, 0) * a(2, 2) - a(1, 2) * a(2, 0))
        + a(0, 2) * (a(1, 0) * a(2, 1) - a(1, 1) * a(2, 0))
}

/// Remove the keys of every attribute argument inside the `time` range.
pub fn cut_keys(scene: &mut Scene, action: &Action) -> Result<usize, ExecError> {
    let (start, end) = time_range(action)?;
    let mut removed = 0;
    for attr in attr_args(action)? {
        removed += scene.cut_keys(&attr, start, end)?;
    }
    log::debug!("Cut {removed} keys in [{start}, {end}]");
    Ok(removed)
}

/// Set the tangents of every attribute argument's keys inside the `time`
/// range.
pub fn key_tangent(scene: &mut Scene, action: &Action) -> Result<usize, ExecError> {
    let (start, end) = time_range(action)?;
    let in_tangent: TangentType = kwarg(action, "in_tangent_type")?.unwrap_or_default();
    let out_tangent: TangentType = kwarg(action, "out_tangent_type")?.unwrap_or_default();
    let mut changed = 0;
    for attr in attr_args(action)? {
        changed += scene.set_key_tangents(&attr, start, end, in_tangent, out_tangent)?;
    }
    Ok(changed)
}

/// Move a bundle to the point closest to the rays of its markers.
///
/// The point minimises the summed squared distance to every ray, solving
/// `Σ (I - d dᵀ) p = Σ (I - d dᵀ) o` over ray origins `o` and directions `d`.
/// The bundle is left untouched when the rays are parallel or fewer than two.
/// Animated translates are keyed on the earliest ray frame.
///
/// # Errors
///
/// Returns a scene error if any bundle translate attribute is locked.
///
/// # Returns
///
/// The new bundle position, if it was moved.
pub fn triangulate_bundle(scene: &mut Scene, action: &Action) -> Result<Option<[f64; 3]>, ExecError> {
    let bundle = Bundle::new(arg::<String>(action, 0)?);
    let rays: Vec<MarkerRays> = arg(action, 1)?;

    let mut lhs = faer::Mat::<f64>::zeros(3, 3);
    let mut rhs = faer::Mat::<f64>::zeros(3, 1);
    let mut count = 0;
    let mut first_frame: Option<i32> = None;
    for MarkerRays(node, _, frames) in &rays {
        let marker = Marker::new(node.as_str());
        let Some(camera) = scene.marker_camera(&marker) else {
            log::warn!("Marker {node} has no camera, skipping");
            continue;
        };
        for &frame in frames {
            let Some(image) = scene.marker_position(&marker, frame) else {
                continue;
            };
            let pose = scene.camera_pose(&camera, frame)?;
            let d = pose.ray_direction(&image);
            let o = pose.position;
            for i in 0..3 {
                let mut row_dot_o = 0.0;
                for j in 0..3 {
                    let eye = if i == j { 1.0 } else { 0.0 };
                    let a = eye - d[i] * d[j];
                    lhs.write(i, j, lhs.read(i, j) + a);
                    row_dot_o += a * o[j];
                }
                rhs.write(i, 0, rhs.read(i, 0) + row_dot_o);
            }
            count += 1;
            first_frame = Some(first_frame.map_or(frame, |f| f.min(frame)));
        }
    }

    let solvable = count >= 2 && det3(&lhs).abs() >= TRIANGULATE_MIN_DET;
    let Some(frame) = first_frame.filter(|_| solvable) else {
        log::warn!("Cannot triangulate bundle {} from {count} rays", bundle.node);
        return Ok(None);
    };
    let p = lhs.partial_piv_lu().solve(rhs.as_ref());
    let position = [p.read(0, 0), p.read(1, 0), p.read(2, 0)];
    scene.set_bundle_position(&bundle, frame, position)?;
    log::debug!("Triangulated bundle {} at {position:?}", bundle.node);
    Ok(Some(position))
}

/// Unwrap the keys of an angle attribute so consecutive keys differ by at
/// most half a turn.
///
/// # Returns
///
/// The number of keys changed.
pub fn euler_filter(scene: &mut Scene, action: &Action) -> Result<usize, ExecError> {
    let attr = Attribute::new(arg::<String>(action, 0)?, arg::<String>(action, 1)?);
    let data = scene.attr_data_mut(&attr)?;
    let mut changed = 0;
    let mut previous: Option<f64> = None;
    for key in data.keys.values_mut() {
        if let Some(prev) = previous {
            let turns = ((key.value - prev) / 360.0).round();
            if turns != 0.0 {
                key.value -= turns * 360.0;
                changed += 1;
            }
        }
        previous = Some(key.value);
    }
    Ok(changed)
}
