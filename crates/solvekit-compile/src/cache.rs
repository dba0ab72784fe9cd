use std::collections::HashMap;

use solvekit_scene::{Attribute, Marker, SceneQuery};

use crate::{Action, ActionIter, ActionPair, SolverCompile, SolverError};

/// The visibility pattern a cached compile is keyed by.
///
/// Taken at the frame of a strategy's frame list with the fewest enabled
/// markers: the number of enabled markers and their names in input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisibilityKey {
    /// Number of enabled markers.
    pub count: usize,
    /// Names of the enabled markers.
    pub markers: Vec<String>,
}

impl VisibilityKey {
    /// Compute the key for markers over the given frame numbers.
    ///
    /// Returns `None` for an empty frame list. Ties between frames go to
    /// the frame listed first.
    pub fn from_frames(scene: &dyn SceneQuery, markers: &[Marker], frames: &[i32]) -> Option<Self> {
        let mut best: Option<VisibilityKey> = None;
        for &frame in frames {
            let enabled: Vec<String> = markers
                .iter()
                .filter(|m| scene.marker_enabled(m, frame))
                .map(|m| m.node.clone())
                .collect();
            if best.as_ref().map_or(true, |b| enabled.len() < b.count) {
                best = Some(VisibilityKey {
                    count: enabled.len(),
                    markers: enabled,
                });
            }
        }
        best
    }
}

/// Validate actions recorded per visibility pattern.
///
/// A cache must only be reused across compiles of one strategy whose
/// markers and attributes stay the same and only the frames change. The
/// attribute set is not part of the key.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: HashMap<VisibilityKey, Vec<Option<Action>>>,
}

impl CompileCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of visibility patterns recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate actions recorded for a visibility pattern.
    pub fn get(&self, key: &VisibilityKey) -> Option<&[Option<Action>]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

/// Compile a strategy, reusing validate actions for repeated visibility
/// patterns.
///
/// Without a cache or without validation the strategy is compiled directly.
/// On a cache miss the strategy is compiled with validation and every
/// validate action is recorded in yield order. On a hit it is compiled
/// without validation and its execute actions are paired with the recorded
/// validate actions by position.
///
/// # Errors
///
/// Errors from the strategy's compile are returned unchanged. On a hit, an
/// item [`SolverError::CacheMismatch`] is yielded if the strategy produces a
/// different number of actions than was recorded.
pub fn compile_with_cache<'a>(
    solver: &'a dyn SolverCompile,
    scene: &'a dyn SceneQuery,
    markers: &'a [Marker],
    attrs: &'a [Attribute],
    with_validation: bool,
    cache: Option<&'a mut CompileCache>,
) -> Result<ActionIter<'a>, SolverError> {
    let cache = match cache {
        Some(cache) if with_validation => cache,
        _ => return solver.compile(scene, markers, attrs, with_validation),
    };

    let frames: Vec<i32> = solver.frame_list().iter().map(|f| f.number).collect();
    let Some(key) = VisibilityKey::from_frames(scene, markers, &frames) else {
        log::debug!("No frames to key the compile cache with, compiling directly");
        return solver.compile(scene, markers, attrs, with_validation);
    };

    if let Some(cached) = cache.get(&key) {
        log::debug!("Compile cache hit; enabled markers={}", key.count);
        let cached = cached.to_vec();
        let inner = solver.compile(scene, markers, attrs, false)?;
        return Ok(Box::new(CachedPairs {
            inner,
            cached,
            index: 0,
            done: false,
        }));
    }

    log::debug!("Compile cache miss; enabled markers={}", key.count);
    let inner = solver.compile(scene, markers, attrs, true)?;
    let entry = cache.entries.entry(key).or_default();
    Ok(Box::new(inner.map(
        move |item| -> Result<ActionPair, SolverError> {
            let (action, vaction) = item?;
            entry.push(vaction.clone());
            Ok((action, vaction))
        },
    )))
}

struct CachedPairs<'a> {
    inner: ActionIter<'a>,
    cached: Vec<Option<Action>>,
    index: usize,
    done: bool,
}

impl Iterator for CachedPairs<'_> {
    type Item = Result<ActionPair, SolverError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok((action, _))) => {
                let Some(vaction) = self.cached.get(self.index).cloned() else {
                    self.done = true;
                    return Some(Err(SolverError::CacheMismatch {
                        expected: self.cached.len(),
                        actual: self.index + 1,
                    }));
                };
                self.index += 1;
                Some(Ok((action, vaction)))
            }
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                if self.index != self.cached.len() {
                    return Some(Err(SolverError::CacheMismatch {
                        expected: self.cached.len(),
                        actual: self.index,
                    }));
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameList, SolverStep};
    use solvekit_scene::{Scene, SceneError};

    fn scene() -> Result<(Scene, Vec<Marker>, Vec<Attribute>), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd1 = scene.add_bundle("bundle1")?;
        let bnd2 = scene.add_bundle("bundle2")?;
        let mkr1 = scene.add_marker("marker1", &cam, Some(&bnd1))?;
        let mkr2 = scene.add_marker("marker2", &cam, Some(&bnd2))?;
        for f in 1..=10 {
            scene.set_marker_position(&mkr1, f, 0.0, 0.0)?;
            if f % 2 == 0 {
                scene.set_marker_position(&mkr2, f, 0.1, 0.1)?;
            }
        }
        let attrs = vec![Attribute::new("camera1", "translateX")];
        scene.set_keyframe(&attrs[0], 1, 0.0)?;
        Ok((scene, vec![mkr1, mkr2], attrs))
    }

    fn step(frame: i32) -> Result<SolverStep, SolverError> {
        Ok(SolverStep::new().with_frame_list(FrameList::from_numbers([frame])?))
    }

    #[test]
    fn test_visibility_key() -> Result<(), Box<dyn std::error::Error>> {
        let (scene, markers, _) = scene()?;
        let key = VisibilityKey::from_frames(&scene, &markers, &[2, 3, 5]);
        assert_eq!(
            key,
            Some(VisibilityKey {
                count: 1,
                markers: vec!["marker1".to_string()],
            })
        );
        assert_eq!(VisibilityKey::from_frames(&scene, &markers, &[]), None);
        Ok(())
    }

    #[test]
    fn test_cache_hit_pairs_cached_validation() -> Result<(), Box<dyn std::error::Error>> {
        let (scene, markers, attrs) = scene()?;
        let mut cache = CompileCache::new();

        let first = step(1)?;
        let miss: Vec<ActionPair> =
            compile_with_cache(&first, &scene, &markers, &attrs, true, Some(&mut cache))?
                .collect::<Result<_, _>>()?;
        assert_eq!(miss.len(), 1);
        assert_eq!(cache.len(), 1);

        // frame 3 has the same visibility pattern as frame 1
        let second = step(3)?;
        let hit: Vec<ActionPair> =
            compile_with_cache(&second, &scene, &markers, &attrs, true, Some(&mut cache))?
                .collect::<Result<_, _>>()?;
        assert_eq!(hit.len(), miss.len());
        assert_eq!(cache.len(), 1);
        assert_eq!(hit[0].1, miss[0].1);
        assert_eq!(hit[0].0.kwarg("frame"), Some(&serde_json::json!([3])));

        // frame 2 adds marker2 and is a new pattern
        let third = step(2)?;
        let _ = compile_with_cache(&third, &scene, &markers, &attrs, true, Some(&mut cache))?
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(cache.len(), 2);
        Ok(())
    }

    #[test]
    fn test_without_validation_bypasses_cache() -> Result<(), Box<dyn std::error::Error>> {
        let (scene, markers, attrs) = scene()?;
        let mut cache = CompileCache::new();
        let sol = step(1)?;
        let pairs: Vec<ActionPair> =
            compile_with_cache(&sol, &scene, &markers, &attrs, false, Some(&mut cache))?
                .collect::<Result<_, _>>()?;
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].1.is_none());
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_cache_mismatch_detected() -> Result<(), Box<dyn std::error::Error>> {
        let (scene, markers, attrs) = scene()?;
        let mut cache = CompileCache::new();
        let sol = step(1)?;
        let key = VisibilityKey::from_frames(&scene, &markers, &[1]).ok_or("no key")?;
        cache.entries.insert(key, vec![None, None]);

        let result: Result<Vec<ActionPair>, SolverError> =
            compile_with_cache(&sol, &scene, &markers, &attrs, true, Some(&mut cache))?.collect();
        assert!(matches!(
            result,
            Err(SolverError::CacheMismatch {
                expected: 2,
                actual: 1
            })
        ));
        Ok(())
    }
}
