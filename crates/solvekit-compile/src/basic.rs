use serde::{Deserialize, Serialize};
use serde_json::Value;
use solvekit_scene::{AttrKind, AttrState, Attribute, Frame, Marker, SceneQuery};

use crate::{
    action::FUNC_EULER_FILTER, cache::compile_with_cache, step::AutoDiffType, Action, ActionIter,
    ActionPair, CompileCache, FrameList, SolverCompile, SolverError, SolverStep,
};

/// Solve animated attributes one frame at a time.
///
/// With a single frame, one line-up solve of the animated attributes on that
/// frame is compiled instead. Multi-frame solves end with an euler filter on
/// every animated angle attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverBasic {
    name: String,
    enabled: bool,
    frame_list: FrameList,
    use_single_frame: bool,
    single_frame: Option<i32>,
    anim_iteration_num: u32,
    lineup_iteration_num: u32,
    use_euler_filter: bool,
}

impl Default for SolverBasic {
    fn default() -> Self {
        Self {
            name: "solver".to_string(),
            enabled: true,
            frame_list: FrameList::new(),
            use_single_frame: false,
            single_frame: None,
            anim_iteration_num: 10,
            lineup_iteration_num: 10,
            use_euler_filter: true,
        }
    }
}

impl SolverBasic {
    /// Create a strategy with default settings and no frames.
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

    /// Frames solved one at a time.
    pub fn frame_list(&self) -> &FrameList {
        &self.frame_list
    }

    /// Mutable frames solved one at a time.
    pub fn frame_list_mut(&mut self) -> &mut FrameList {
        &mut self.frame_list
    }

    /// Solve one frame only.
    pub fn set_single_frame(&mut self, frame: Option<i32>) {
        self.use_single_frame = frame.is_some();
        self.single_frame = frame;
    }

    /// Iterations per frame solve.
    pub fn anim_iteration_num(&self) -> u32 {
        self.anim_iteration_num
    }

    /// Set the iterations per frame solve.
    pub fn set_anim_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        if value == 0 {
            return Err(SolverError::NotValid(
                "anim_iteration_num must be greater than zero".into(),
            ));
        }
        self.anim_iteration_num = value;
        Ok(())
    }

    /// Set the iterations of the single frame solve.
    pub fn set_lineup_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        if value == 0 {
            return Err(SolverError::NotValid(
                "lineup_iteration_num must be greater than zero".into(),
            ));
        }
        self.lineup_iteration_num = value;
        Ok(())
    }

    /// Set whether rotation curves are euler filtered after solving.
    pub fn set_use_euler_filter(&mut self, value: bool) {
        self.use_euler_filter = value;
    }

    pub(crate) fn check(&self) -> Result<(), SolverError> {
        if self.anim_iteration_num == 0 || self.lineup_iteration_num == 0 {
            return Err(SolverError::NotValid(format!(
                "Iteration counts must be greater than zero; solver={}",
                self.name
            )));
        }
        Ok(())
    }

    fn step(&self, frame: i32, iterations: u32) -> Result<SolverStep, SolverError> {
        Ok(SolverStep::new()
            .with_frame_list(FrameList::from_numbers([frame])?)
            .with_max_iterations(iterations)
            .with_attributes_use_animated(true)
            .with_attributes_use_static(false)
            .with_auto_diff_type(AutoDiffType::Forward))
    }
}

/// One `euler_filter` action per animated angle attribute.
pub fn compile_euler_filter(scene: &dyn SceneQuery, attrs: &[Attribute]) -> Vec<ActionPair> {
    attrs
        .iter()
        .filter(|a| scene.attr_kind(a) == AttrKind::Angle)
        .filter(|a| scene.attr_state(a) == AttrState::Animated)
        .map(|a| {
            let args = vec![Value::from(a.node.as_str()), Value::from(a.attr.as_str())];
            (Action::new(FUNC_EULER_FILTER, args, Default::default()), None)
        })
        .collect()
}

impl SolverCompile for SolverBasic {
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError> {
        self.check()?;
        if self.use_single_frame {
            let frame = self.single_frame.ok_or_else(|| {
                SolverError::NotValid(format!(
                    "Single frame solve requested without a frame; solver={}",
                    self.name
                ))
            })?;
            let step = self.step(frame, self.lineup_iteration_num)?;
            let pair = step.compile_action(scene, markers, attrs, with_validation)?;
            return Ok(Box::new(pair.into_iter().map(Ok)));
        }

        let euler = if self.use_euler_filter {
            compile_euler_filter(scene, attrs)
        } else {
            Vec::new()
        };
        let mut cache = CompileCache::new();
        let frames = self.frame_list.numbers();
        let per_frame = frames.into_iter().flat_map(move |frame| {
            let compiled = self.step(frame, self.anim_iteration_num).and_then(|step| {
                compile_with_cache(&step, scene, markers, attrs, with_validation, Some(&mut cache))?
                    .collect::<Result<Vec<_>, _>>()
            });
            match compiled {
                Ok(pairs) => pairs.into_iter().map(Ok).collect::<Vec<_>>(),
                Err(err) => vec![Err(err)],
            }
        });
        Ok(Box::new(per_frame.chain(euler.into_iter().map(Ok))))
    }

    fn frame_list(&self) -> Vec<Frame> {
        self.frame_list.frames().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solvekit_scene::Scene;

    #[test]
    fn test_basic_per_frame() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        let rx = Attribute::new("camera1", "rotateX");
        let tx = Attribute::new("bundle1", "translateX");
        for f in 1..=3 {
            scene.set_marker_position(&mkr, f, 0.0, 0.0)?;
            scene.set_keyframe(&rx, f, 0.0)?;
        }

        let mut sol = SolverBasic::new();
        sol.frame_list_mut().extend((1..=3).map(Frame::new))?;
        let markers = [mkr];
        let attrs = [rx, tx];
        let pairs: Vec<ActionPair> = sol
            .compile(&scene, &markers, &attrs, true)?
            .collect::<Result<_, _>>()?;

        // three frame solves, then the filter on rotateX
        assert_eq!(pairs.len(), 4);
        assert!(pairs[..3].iter().all(|(a, v)| a.is_solve() && v.is_some()));
        assert_eq!(pairs[1].1, pairs[0].1);
        assert_eq!(pairs[3].0.func, FUNC_EULER_FILTER);
        assert_eq!(
            pairs[0].0.kwarg("attr"),
            Some(&serde_json::json!([["camera1.rotateX", "None", "None", "360.0", "None"]]))
        );

        sol.set_single_frame(Some(2));
        let pairs: Vec<ActionPair> = sol
            .compile(&scene, &markers, &attrs, false)?
            .collect::<Result<_, _>>()?;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.kwarg("frame"), Some(&serde_json::json!([2])));
        Ok(())
    }
}
