use std::collections::{BTreeMap, VecDeque};

use solvekit_scene::{AttrState, Attribute, Marker, SceneQuery};

use crate::category::BUNDLE_TRANSFORM_ATTRS;

/// Frames closer than this to an existing root frame are skipped while other
/// candidates remain.
const ROOT_FRAME_SPACING: i32 = 2;

/// Minimum frames a marker needs to constrain its bundle.
///
/// Two when any bundle translate attribute is static, one when all of them
/// are animated or all of them are locked, zero otherwise.
fn marker_min_frames(scene: &dyn SceneQuery, marker: &Marker) -> usize {
    let Some(bundle) = scene.marker_bundle(marker) else {
        return 0;
    };
    let states: Vec<AttrState> = BUNDLE_TRANSFORM_ATTRS
        .iter()
        .map(|a| scene.attr_state(&Attribute::new(bundle.node.clone(), *a)))
        .collect();
    if states.contains(&AttrState::Static) {
        2
    } else if states.iter().all(|s| *s == AttrState::Animated)
        || states.iter().all(|s| *s == AttrState::Locked)
    {
        1
    } else {
        0
    }
}

/// Pick root frames so every marker is seen on enough of them.
///
/// For each marker, frames shared with the most other markers are tried
/// first, alternating between the earliest and latest candidate so the
/// chosen frames spread across the marker's range.
///
/// # Arguments
///
/// * `scene` - The scene holding the markers.
/// * `markers` - Markers to cover, in priority order.
/// * `min_frames_per_marker` - Frames each marker must be seen on.
/// * `start` - First frame considered.
/// * `end` - Last frame considered.
///
/// # Returns
///
/// The sorted root frame numbers.
pub fn get_root_frames_from_markers(
    scene: &dyn SceneQuery,
    markers: &[Marker],
    min_frames_per_marker: usize,
    start: i32,
    end: i32,
) -> Vec<i32> {
    let enabled: Vec<Vec<i32>> = markers
        .iter()
        .map(|m| scene.marker_enabled_frames(m, Some(start), Some(end)))
        .collect();

    // per marker: number of other markers visible -> frames
    let mut common: Vec<BTreeMap<usize, Vec<i32>>> = Vec::with_capacity(markers.len());
    let mut min_frames: Vec<usize> = Vec::with_capacity(markers.len());
    for (i, marker) in markers.iter().enumerate() {
        let min_count = marker_min_frames(scene, marker).max(min_frames_per_marker);
        min_frames.push(min_count);

        let mut by_count: BTreeMap<usize, Vec<i32>> = BTreeMap::new();
        for &frame in &enabled[i] {
            let count = enabled
                .iter()
                .enumerate()
                .filter(|(j, frames)| *j != i && frames.binary_search(&frame).is_ok())
                .count();
            if count + 1 >= min_count {
                by_count.entry(count).or_default().push(frame);
            }
        }
        common.push(by_count);
    }

    let mut root_frames: Vec<i32> = Vec::new();
    for (i, marker) in markers.iter().enumerate() {
        let mut marker_frames: Vec<i32> = Vec::new();
        for frames in common[i].values().rev() {
            if marker_frames.len() >= min_frames[i] {
                break;
            }
            let mut keys: VecDeque<i32> = frames.iter().copied().collect();
            let mut toggle = 0usize;
            while marker_frames.len() < min_frames[i] {
                let frame = if toggle % 2 == 0 {
                    keys.pop_front()
                } else {
                    keys.pop_back()
                };
                let Some(frame) = frame else {
                    break;
                };
                let too_close = root_frames
                    .iter()
                    .any(|r| (r - frame).abs() <= ROOT_FRAME_SPACING);
                if !keys.is_empty() && too_close {
                    continue;
                }
                if !marker_frames.contains(&frame) {
                    marker_frames.push(frame);
                }
                if !root_frames.contains(&frame) {
                    root_frames.push(frame);
                }
                toggle += 1;
            }
        }
        log::debug!("Root frames for marker {}: {marker_frames:?}", marker.node);
    }
    root_frames.sort_unstable();
    root_frames
}
