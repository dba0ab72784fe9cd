//! The standard strategy solves root frames first, then the frames between.
//!
//! Compiling runs a small state machine over the solve stages:
//!
//! 1. triangulate bundles, when enabled;
//! 2. solve each attribute block on the root frames, when enabled;
//! 3. solve the root frames, globally or pair by pair;
//! 4. cut keys on the in-between frames and make the remaining keys linear;
//! 5. solve the animated attributes per frame, or everything at once.
//!
//! A single-frame configuration runs the attribute blocks and one line-up
//! solve on that frame instead. Each stage is compiled only when the
//! iterator reaches it, so a failing stage stops the sequence before later
//! stages do any work.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solvekit_scene::{Attribute, Frame, Marker, SceneQuery};

use crate::{
    action::{FUNC_CUT_KEYS, FUNC_KEY_TANGENT},
    affects::{attrs_affecting, split_into_categories},
    cache::compile_with_cache,
    flags::unlocked_attr_names,
    step::AutoDiffType,
    Action, ActionIter, ActionPair, CompileCache, FrameList, SolverCompile, SolverError,
    SolverStep, SolverTriangulate,
};

/// How root frames are grouped into solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootFrameStrategy {
    /// One solve over all root frames.
    #[default]
    Global,
    /// One solve per consecutive pair of root frames.
    ForwardPair,
    /// Consecutive pairs, then one solve over all root frames.
    ForwardPairAndGlobal,
    /// Reserved, compiling with it fails.
    ForwardIncrement,
}

/// Solve root frames with static and animated attributes, then the frames
/// in between with animated attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverStandard {
    name: String,
    enabled: bool,
    frame_list: FrameList,
    root_frame_list: FrameList,
    use_single_frame: bool,
    single_frame: Option<i32>,
    only_root_frames: bool,
    global_solve: bool,
    root_frame_strategy: RootFrameStrategy,
    block_iteration_num: u32,
    root_iteration_num: u32,
    anim_iteration_num: u32,
    lineup_iteration_num: u32,
    auto_attr_blocks: bool,
    triangulate_bundles: bool,
}

impl Default for SolverStandard {
    fn default() -> Self {
        Self {
            name: "solver".to_string(),
            enabled: true,
            frame_list: FrameList::new(),
            root_frame_list: FrameList::new(),
            use_single_frame: false,
            single_frame: None,
            only_root_frames: false,
            global_solve: false,
            root_frame_strategy: RootFrameStrategy::Global,
            block_iteration_num: 10,
            root_iteration_num: 20,
            anim_iteration_num: 10,
            lineup_iteration_num: 10,
            auto_attr_blocks: false,
            triangulate_bundles: false,
        }
    }
}

fn positive(value: u32, what: &str) -> Result<u32, SolverError> {
    if value == 0 {
        return Err(SolverError::NotValid(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(value)
}

impl SolverStandard {
    /// Create a strategy with default settings and no frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the strategy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the name of the strategy.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Is the strategy used when compiling a collection?
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the strategy.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Frames solved for animated attributes.
    pub fn frame_list(&self) -> &FrameList {
        &self.frame_list
    }

    /// Mutable frames solved for animated attributes.
    pub fn frame_list_mut(&mut self) -> &mut FrameList {
        &mut self.frame_list
    }

    /// Frames solved for static and animated attributes.
    pub fn root_frame_list(&self) -> &FrameList {
        &self.root_frame_list
    }

    /// Mutable frames solved for static and animated attributes.
    pub fn root_frame_list_mut(&mut self) -> &mut FrameList {
        &mut self.root_frame_list
    }

    /// Solve one frame only?
    pub fn use_single_frame(&self) -> bool {
        self.use_single_frame
    }

    /// Set whether one frame only is solved.
    pub fn set_use_single_frame(&mut self, value: bool) {
        self.use_single_frame = value;
    }

    /// The frame solved when solving one frame only.
    pub fn single_frame(&self) -> Option<Frame> {
        self.single_frame.map(Frame::new)
    }

    /// Set the frame solved when solving one frame only.
    pub fn set_single_frame(&mut self, frame: impl Into<Frame>) {
        self.single_frame = Some(frame.into().number);
    }

    /// Stop after solving the root frames?
    pub fn only_root_frames(&self) -> bool {
        self.only_root_frames
    }

    /// Set whether to stop after solving the root frames.
    pub fn set_only_root_frames(&mut self, value: bool) {
        self.only_root_frames = value;
    }

    /// Solve all frames and attributes together after the root frames?
    pub fn global_solve(&self) -> bool {
        self.global_solve
    }

    /// Set whether all frames and attributes are solved together.
    pub fn set_global_solve(&mut self, value: bool) {
        self.global_solve = value;
    }

    /// How root frames are grouped.
    pub fn root_frame_strategy(&self) -> RootFrameStrategy {
        self.root_frame_strategy
    }

    /// Set how root frames are grouped.
    pub fn set_root_frame_strategy(&mut self, value: RootFrameStrategy) {
        self.root_frame_strategy = value;
    }

    /// Iterations per attribute block solve.
    pub fn block_iteration_num(&self) -> u32 {
        self.block_iteration_num
    }

    /// Set the iterations per attribute block solve.
    pub fn set_block_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        self.block_iteration_num = positive(value, "block_iteration_num")?;
        Ok(())
    }

    /// Iterations per root frame solve.
    pub fn root_iteration_num(&self) -> u32 {
        self.root_iteration_num
    }

    /// Set the iterations per root frame solve.
    pub fn set_root_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        self.root_iteration_num = positive(value, "root_iteration_num")?;
        Ok(())
    }

    /// Iterations per animated solve.
    pub fn anim_iteration_num(&self) -> u32 {
        self.anim_iteration_num
    }

    /// Set the iterations per animated solve.
    pub fn set_anim_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        self.anim_iteration_num = positive(value, "anim_iteration_num")?;
        Ok(())
    }

    /// Iterations of the single frame line-up solve.
    pub fn lineup_iteration_num(&self) -> u32 {
        self.lineup_iteration_num
    }

    /// Set the iterations of the single frame line-up solve.
    pub fn set_lineup_iteration_num(&mut self, value: u32) -> Result<(), SolverError> {
        self.lineup_iteration_num = positive(value, "lineup_iteration_num")?;
        Ok(())
    }

    /// Solve attribute blocks before the main solves?
    pub fn auto_attr_blocks(&self) -> bool {
        self.auto_attr_blocks
    }

    /// Set whether attribute blocks are solved first.
    pub fn set_auto_attr_blocks(&mut self, value: bool) {
        self.auto_attr_blocks = value;
    }

    /// Triangulate bundles before the main solves?
    pub fn triangulate_bundles(&self) -> bool {
        self.triangulate_bundles
    }

    /// Set whether bundles are triangulated first.
    pub fn set_triangulate_bundles(&mut self, value: bool) {
        self.triangulate_bundles = value;
    }

    pub(crate) fn check(&self) -> Result<(), SolverError> {
        positive(self.block_iteration_num, "block_iteration_num")?;
        positive(self.root_iteration_num, "root_iteration_num")?;
        positive(self.anim_iteration_num, "anim_iteration_num")?;
        positive(self.lineup_iteration_num, "lineup_iteration_num")?;
        Ok(())
    }

    /// Encode the strategy as a plain key-value map.
    pub fn to_data(&self) -> Result<Map<String, Value>, SolverError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(SolverError::NotValid("Solver data is not a mapping".into())),
        }
    }

    /// Decode the strategy from a key-value map, missing keys take defaults.
    pub fn from_data(data: Map<String, Value>) -> Result<Self, SolverError> {
        let solver: Self = serde_json::from_value(Value::Object(data))?;
        solver.check()?;
        Ok(solver)
    }

    fn plan(&self) -> Result<Plan, SolverError> {
        self.check()?;
        if self.use_single_frame {
            let frame = self.single_frame.ok_or_else(|| {
                SolverError::NotValid(format!(
                    "Single frame solve requested without a frame; solver={}",
                    self.name
                ))
            })?;
            return Ok(Plan::Single(frame));
        }

        let batching = match self.root_frame_strategy {
            RootFrameStrategy::Global => RootBatching::Global,
            RootFrameStrategy::ForwardPair => RootBatching::Pairs,
            RootFrameStrategy::ForwardPairAndGlobal => RootBatching::PairsAndGlobal,
            RootFrameStrategy::ForwardIncrement => {
                return Err(SolverError::NotValid(format!(
                    "Root frame strategy is not implemented: {:?}; solver={}",
                    self.root_frame_strategy, self.name
                )));
            }
        };
        if self.root_frame_list.is_empty() {
            return Err(SolverError::NotValid(format!(
                "Solver is not valid, no root frames given; solver={}",
                self.name
            )));
        }

        let root_numbers = self.root_frame_list.numbers();
        let mut all_frames = self.frame_list.numbers();
        all_frames.extend(&root_numbers);
        all_frames.sort_unstable();
        all_frames.dedup();
        let mut non_root_frames: Vec<i32> = self
            .frame_list
            .numbers()
            .into_iter()
            .filter(|f| !root_numbers.contains(f))
            .collect();
        non_root_frames.sort_unstable();

        Ok(Plan::Multi(MultiFramePlan {
            batching,
            root_frames: self.root_frame_list.frames().to_vec(),
            all_frames,
            non_root_frames,
        }))
    }

    fn step(&self, frames: FrameList, iterations: u32, use_static: bool) -> SolverStep {
        let mut step = SolverStep::new()
            .with_frame_list(frames)
            .with_max_iterations(iterations)
            .with_verbose(true)
            .with_attributes_use_animated(true)
            .with_attributes_use_static(use_static)
            .with_auto_diff_type(AutoDiffType::Forward);
        step.set_name(self.name.clone());
        step
    }
}

/// Markers enabled on at least two of the frames, and the rest.
///
/// A frame listed twice counts twice, so a pair `(f, f)` keeps markers
/// enabled on `f`.
pub fn filter_markers_by_frame_list(
    scene: &dyn SceneQuery,
    markers: &[Marker],
    frames: &[i32],
) -> (Vec<Marker>, Vec<Marker>) {
    markers.iter().cloned().partition(|m| {
        frames.iter().filter(|&&f| scene.marker_enabled(m, f)).count() >= 2
    })
}

/// Consecutive overlapping pairs of frame numbers.
///
/// A single frame becomes the pair `(f, f)`. An empty list has no pairs.
///
/// Example:
///
/// ```
/// use solvekit_compile::standard::gen_two_frame_forward;
///
/// assert_eq!(gen_two_frame_forward(&[1, 5, 9]), vec![[1, 5], [5, 9]]);
/// assert_eq!(gen_two_frame_forward(&[7]), vec![[7, 7]]);
/// ```
pub fn gen_two_frame_forward(frames: &[i32]) -> Vec<[i32; 2]> {
    match frames {
        [single] => vec![[*single, *single]],
        _ => frames.windows(2).map(|w| [w[0], w[1]]).collect(),
    }
}

/// Actions removing keys between the root frames.
///
/// One `cut_keys` action per non-root frame, then one `key_tangent` action
/// making the keys linear over `[start - 1, end + 1]`.
pub fn compile_clear_inbetween(
    attr_names: &[String],
    non_root_frames: &[i32],
    start: i32,
    end: i32,
) -> Vec<ActionPair> {
    let args: Vec<Value> = attr_names.iter().map(|n| Value::from(n.as_str())).collect();
    let mut pairs: Vec<ActionPair> = non_root_frames
        .iter()
        .map(|&f| {
            let mut kwargs = Map::new();
            kwargs.insert("time".into(), serde_json::json!([f, f]));
            (Action::new(FUNC_CUT_KEYS, args.clone(), kwargs), None)
        })
        .collect();

    let mut kwargs = Map::new();
    kwargs.insert("in_tangent_type".into(), Value::from("linear"));
    kwargs.insert("out_tangent_type".into(), Value::from("linear"));
    kwargs.insert(
        "time".into(),
        serde_json::json!([start.saturating_sub(1), end.saturating_add(1)]),
    );
    pairs.push((Action::new(FUNC_KEY_TANGENT, args, kwargs), None));
    pairs
}

enum Plan {
    Single(i32),
    Multi(MultiFramePlan),
}

/// How the root frame stage groups its solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootBatching {
    Global,
    Pairs,
    PairsAndGlobal,
}

struct MultiFramePlan {
    batching: RootBatching,
    root_frames: Vec<Frame>,
    all_frames: Vec<i32>,
    non_root_frames: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Triangulate,
    AttrBlocks,
    RootFrames,
    RootBatch(usize),
    ClearInbetween,
    AnimGlobal,
    AnimFrame(usize),
    LineupBlocks,
    Lineup,
    Done,
}

struct StandardActions<'a> {
    config: &'a SolverStandard,
    scene: &'a dyn SceneQuery,
    markers: &'a [Marker],
    attrs: &'a [Attribute],
    with_validation: bool,
    single_frame: i32,
    plan: MultiFramePlan,
    batches: Vec<Vec<i32>>,
    cache: CompileCache,
    pending: VecDeque<ActionPair>,
    stage: Stage,
}

impl StandardActions<'_> {
    fn push_step(
        &mut self,
        step: &SolverStep,
        markers: &[Marker],
        attrs: &[Attribute],
    ) -> Result<(), SolverError> {
        if let Some(pair) = step.compile_action(self.scene, markers, attrs, self.with_validation)? {
            self.pending.push_back(pair);
        }
        Ok(())
    }

    fn push_blocks(&mut self, markers: &[Marker], frames: FrameList) -> Result<(), SolverError> {
        for block in split_into_categories(self.scene, markers, self.attrs) {
            log::debug!("Attribute block {:?} on {}", block.category, block.node);
            let step = self.config.step(frames.clone(), self.config.block_iteration_num, true);
            self.push_step(&step, &block.markers, &block.attrs)?;
        }
        Ok(())
    }

    fn root_frame_numbers(&self) -> Vec<i32> {
        self.plan.root_frames.iter().map(|f| f.number).collect()
    }

    fn run(&mut self, stage: Stage) -> Result<Stage, SolverError> {
        let config = self.config;
        match stage {
            Stage::Triangulate => {
                if config.triangulate_bundles {
                    let mut sol = SolverTriangulate::new();
                    sol.root_frame_list_mut()
                        .set(self.plan.root_frames.iter().cloned())?;
                    let pairs = sol.compile_pairs(self.scene, self.markers, self.attrs)?;
                    self.pending.extend(pairs);
                }
                Ok(Stage::AttrBlocks)
            }
            Stage::AttrBlocks => {
                if config.auto_attr_blocks {
                    let (root_markers, _) = filter_markers_by_frame_list(
                        self.scene,
                        self.markers,
                        &self.root_frame_numbers(),
                    );
                    let frames = FrameList::try_from(self.plan.root_frames.clone())?;
                    self.push_blocks(&root_markers, frames)?;
                }
                Ok(Stage::RootFrames)
            }
            Stage::RootFrames => {
                let root_numbers = self.root_frame_numbers();
                match self.plan.batching {
                    RootBatching::Global => {
                        let (root_markers, _) =
                            filter_markers_by_frame_list(self.scene, self.markers, &root_numbers);
                        let frames = FrameList::try_from(self.plan.root_frames.clone())?;
                        let step = config.step(frames, config.root_iteration_num, true);
                        self.push_step(&step, &root_markers, self.attrs)?;
                        return Ok(Stage::ClearInbetween);
                    }
                    RootBatching::Pairs => {
                        self.batches = pairs_to_batches(&root_numbers);
                    }
                    RootBatching::PairsAndGlobal => {
                        self.batches = pairs_to_batches(&root_numbers);
                        self.batches.push(root_numbers);
                    }
                }
                Ok(self.next_batch(0))
            }
            Stage::RootBatch(index) => {
                let batch = self.batches[index].clone();
                let (batch_markers, _) =
                    filter_markers_by_frame_list(self.scene, self.markers, &batch);
                if batch_markers.is_empty() {
                    log::warn!("No root markers found for root frames {batch:?}, skipping");
                    return Ok(self.next_batch(index + 1));
                }
                let batch_attrs = attrs_affecting(self.scene, &batch_markers, self.attrs);
                let mut numbers = batch;
                numbers.dedup();
                let step = config.step(
                    FrameList::from_numbers(numbers)?,
                    config.root_iteration_num,
                    true,
                );
                self.push_step(&step, &batch_markers, &batch_attrs)?;
                Ok(self.next_batch(index + 1))
            }
            Stage::ClearInbetween => {
                let names = unlocked_attr_names(self.scene, self.attrs);
                let start = self.plan.all_frames.first().copied().unwrap_or_default();
                let end = self.plan.all_frames.last().copied().unwrap_or_default();
                self.pending.extend(compile_clear_inbetween(
                    &names,
                    &self.plan.non_root_frames,
                    start,
                    end,
                ));
                Ok(match (config.only_root_frames, config.global_solve) {
                    (true, _) => Stage::Done,
                    (false, true) => Stage::AnimGlobal,
                    (false, false) => self.next_anim_frame(0),
                })
            }
            Stage::AnimGlobal => {
                let frames = FrameList::from_numbers(self.plan.all_frames.iter().copied())?;
                let step = config.step(frames, config.anim_iteration_num, true);
                self.push_step(&step, self.markers, self.attrs)?;
                Ok(Stage::Done)
            }
            Stage::AnimFrame(index) => {
                let frame = self.plan.all_frames[index];
                let step = config.step(
                    FrameList::from_numbers([frame])?,
                    config.anim_iteration_num,
                    false,
                );
                let pairs = compile_with_cache(
                    &step,
                    self.scene,
                    self.markers,
                    self.attrs,
                    self.with_validation,
                    Some(&mut self.cache),
                )?
                .collect::<Result<Vec<_>, _>>()?;
                self.pending.extend(pairs);
                Ok(self.next_anim_frame(index + 1))
            }
            Stage::LineupBlocks => {
                if config.auto_attr_blocks {
                    let frames = FrameList::from_numbers([self.single_frame])?;
                    self.push_blocks(self.markers, frames)?;
                }
                Ok(Stage::Lineup)
            }
            Stage::Lineup => {
                let frames = FrameList::from_numbers([self.single_frame])?;
                let step = config.step(frames, config.lineup_iteration_num, true);
                self.push_step(&step, self.markers, self.attrs)?;
                Ok(Stage::Done)
            }
            Stage::Done => Ok(Stage::Done),
        }
    }

    fn next_batch(&self, index: usize) -> Stage {
        if index < self.batches.len() {
            Stage::RootBatch(index)
        } else {
            Stage::ClearInbetween
        }
    }

    fn next_anim_frame(&self, index: usize) -> Stage {
        if index < self.plan.all_frames.len() {
            Stage::AnimFrame(index)
        } else {
            Stage::Done
        }
    }
}

fn pairs_to_batches(frames: &[i32]) -> Vec<Vec<i32>> {
    gen_two_frame_forward(frames)
        .into_iter()
        .map(|pair| pair.to_vec())
        .collect()
}

impl Iterator for StandardActions<'_> {
    type Item = Result<ActionPair, SolverError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.pending.pop_front() {
                return Some(Ok(pair));
            }
            if self.stage == Stage::Done {
                return None;
            }
            match self.run(self.stage) {
                Ok(next) => self.stage = next,
                Err(err) => {
                    self.stage = Stage::Done;
                    self.pending.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl SolverCompile for SolverStandard {
    /// Validation and verbose output are always on for this strategy, the
    /// `with_validation` argument is ignored.
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        _with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError> {
        let (stage, single_frame, plan) = match self.plan()? {
            Plan::Single(frame) => (
                Stage::LineupBlocks,
                frame,
                MultiFramePlan {
                    batching: RootBatching::Global,
                    root_frames: Vec::new(),
                    all_frames: Vec::new(),
                    non_root_frames: Vec::new(),
                },
            ),
            Plan::Multi(plan) => (Stage::Triangulate, 0, plan),
        };
        Ok(Box::new(StandardActions {
            config: self,
            scene,
            markers,
            attrs,
            with_validation: true,
            single_frame,
            plan,
            batches: Vec::new(),
            cache: CompileCache::new(),
            pending: VecDeque::new(),
            stage,
        }))
    }

    fn frame_list(&self) -> Vec<Frame> {
        self.frame_list.frames().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solvekit_scene::{Scene, SceneError};

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_gen_two_frame_forward() {
        assert_eq!(gen_two_frame_forward(&[7]), vec![[7, 7]]);
        assert_eq!(gen_two_frame_forward(&[1, 3, 5]), vec![[1, 3], [3, 5]]);
        assert!(gen_two_frame_forward(&[]).is_empty());
    }

    #[test]
    fn test_filter_markers_by_frame_list() -> Result<(), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr1 = scene.add_marker("marker1", &cam, Some(&bnd))?;
        let mkr2 = scene.add_marker("marker2", &cam, Some(&bnd))?;
        for f in [1, 3, 5] {
            scene.set_marker_position(&mkr1, f, 0.0, 0.0)?;
        }
        scene.set_marker_position(&mkr2, 1, 0.0, 0.0)?;

        let markers = [mkr1.clone(), mkr2.clone()];
        let (root, non_root) = filter_markers_by_frame_list(&scene, &markers, &[1, 3, 5]);
        assert_eq!(root, vec![mkr1]);
        assert_eq!(non_root, vec![mkr2.clone()]);

        // a degenerate pair counts its frame twice
        let (root, _) = filter_markers_by_frame_list(&scene, &[mkr2.clone()], &[1, 1]);
        assert_eq!(root, vec![mkr2]);
        Ok(())
    }

    #[test]
    fn test_clear_inbetween_actions() {
        let names = strings(&["bundle1.translateX"]);
        let pairs = compile_clear_inbetween(&names, &[2, 3], 1, 4);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0.func, FUNC_CUT_KEYS);
        assert_eq!(pairs[0].0.kwarg("time"), Some(&serde_json::json!([2, 2])));
        assert_eq!(pairs[2].0.func, FUNC_KEY_TANGENT);
        assert_eq!(pairs[2].0.kwarg("time"), Some(&serde_json::json!([0, 5])));
        assert!(pairs.iter().all(|(_, v)| v.is_none()));
    }

    #[test]
    fn test_iteration_setters_reject_zero() {
        let mut sol = SolverStandard::new();
        assert!(sol.set_anim_iteration_num(0).is_err());
        assert_eq!(sol.anim_iteration_num(), 10);
        assert!(sol.set_lineup_iteration_num(3).is_ok());
        assert_eq!(sol.lineup_iteration_num(), 3);
    }
}
