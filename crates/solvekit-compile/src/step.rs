use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solvekit_scene::{Attribute, Frame, Marker, SceneQuery};

use crate::{
    action::FUNC_SOLVE,
    flags,
    frames::{filter_by_tags, DEFAULT_FRAME_USE_TAGS},
    Action, ActionIter, ActionPair, FrameList, SolverCompile, SolverError,
};

/// Finite difference scheme used to approximate the Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoDiffType {
    /// One-sided forward differences.
    #[default]
    Forward,
    /// Two-sided central differences.
    Central,
}

/// Minimiser implementation requested from the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverType {
    /// Damped Gauss-Newton with an adaptive damping factor.
    #[default]
    LevenbergMarquardt,
    /// Levenberg-Marquardt with bounds enforced by clamping.
    LevenbergMarquardtBounded,
}

/// A single solver invocation over a fixed frame list.
///
/// Compiles into at most one `solve` action. When nothing is left to solve
/// after filtering markers, attributes or frames, a warning is logged and no
/// action is produced.
///
/// Example:
///
/// ```
/// use solvekit_compile::{FrameList, SolverStep};
///
/// let step = SolverStep::new()
///     .with_frame_list(FrameList::from_numbers([1, 2, 3]).unwrap())
///     .with_max_iterations(10)
///     .with_attributes_use_static(false);
/// assert_eq!(step.frame_list().len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverStep {
    name: String,
    enabled: bool,
    frame_list: FrameList,
    frames_use_tags: Vec<String>,
    attributes_use_animated: bool,
    attributes_use_static: bool,
    max_iterations: Option<u32>,
    verbose: Option<bool>,
    delta: Option<f64>,
    auto_diff_type: Option<AutoDiffType>,
    tau_factor: Option<f64>,
    gradient_error: Option<f64>,
    parameter_error: Option<f64>,
    error: Option<f64>,
    solver_type: Option<SolverType>,
}

impl Default for SolverStep {
    fn default() -> Self {
        Self {
            name: "solver".to_string(),
            enabled: true,
            frame_list: FrameList::new(),
            frames_use_tags: DEFAULT_FRAME_USE_TAGS.iter().map(|t| t.to_string()).collect(),
            attributes_use_animated: true,
            attributes_use_static: true,
            max_iterations: Some(20),
            verbose: Some(false),
            delta: None,
            auto_diff_type: Some(AutoDiffType::Forward),
            tau_factor: None,
            gradient_error: None,
            parameter_error: None,
            error: None,
            solver_type: None,
        }
    }
}

impl SolverStep {
    /// Create a step with default settings and no frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the step.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the name of the step.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Is the step used when compiling a collection?
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the step.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Frames the step solves.
    pub fn frame_list(&self) -> &FrameList {
        &self.frame_list
    }

    /// Mutable frames the step solves.
    pub fn frame_list_mut(&mut self) -> &mut FrameList {
        &mut self.frame_list
    }

    /// Set the frames the step solves.
    pub fn with_frame_list(mut self, frame_list: FrameList) -> Self {
        self.frame_list = frame_list;
        self
    }

    /// Tags a frame must carry one of to be solved.
    pub fn frames_use_tags(&self) -> &[String] {
        &self.frames_use_tags
    }

    /// Set the tags a frame must carry one of to be solved.
    pub fn with_frames_use_tags(mut self, tags: Vec<String>) -> Self {
        self.frames_use_tags = tags;
        self
    }

    /// Are animated attributes solved?
    pub fn attributes_use_animated(&self) -> bool {
        self.attributes_use_animated
    }

    /// Set whether animated attributes are solved.
    pub fn with_attributes_use_animated(mut self, value: bool) -> Self {
        self.attributes_use_animated = value;
        self
    }

    /// Are static attributes solved?
    pub fn attributes_use_static(&self) -> bool {
        self.attributes_use_static
    }

    /// Set whether static attributes are solved.
    pub fn with_attributes_use_static(mut self, value: bool) -> Self {
        self.attributes_use_static = value;
        self
    }

    /// Maximum solver iterations.
    pub fn max_iterations(&self) -> Option<u32> {
        self.max_iterations
    }

    /// Set the maximum solver iterations.
    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Should the solver print progress?
    pub fn verbose(&self) -> Option<bool> {
        self.verbose
    }

    /// Set whether the solver prints progress.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Set the finite difference step size.
    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = Some(delta);
        self
    }

    /// Set the finite difference scheme.
    pub fn with_auto_diff_type(mut self, auto_diff_type: AutoDiffType) -> Self {
        self.auto_diff_type = Some(auto_diff_type);
        self
    }

    /// Set the initial damping scale.
    pub fn with_tau_factor(mut self, tau: f64) -> Self {
        self.tau_factor = Some(tau);
        self
    }

    /// Set the gradient, parameter change and error stopping thresholds.
    pub fn with_error_factors(
        mut self,
        gradient_error: Option<f64>,
        parameter_error: Option<f64>,
        error: Option<f64>,
    ) -> Self {
        self.gradient_error = gradient_error;
        self.parameter_error = parameter_error;
        self.error = error;
        self
    }

    /// Set the minimiser implementation.
    pub fn with_solver_type(mut self, solver_type: SolverType) -> Self {
        self.solver_type = Some(solver_type);
        self
    }

    fn solve_kwargs(&self) -> Map<String, Value> {
        let mut kwargs = Map::new();
        if let Some(solver_type) = self.solver_type {
            kwargs.insert("solver_type".into(), serde_json::json!(solver_type));
        }
        if let Some(iterations) = self.max_iterations {
            kwargs.insert("iterations".into(), Value::from(iterations));
        }
        if let Some(verbose) = self.verbose {
            kwargs.insert("verbose".into(), Value::from(verbose));
        }
        if let Some(delta) = self.delta {
            kwargs.insert("delta".into(), Value::from(delta));
        }
        if let Some(auto_diff_type) = self.auto_diff_type {
            kwargs.insert("auto_diff_type".into(), serde_json::json!(auto_diff_type));
        }
        if let Some(tau) = self.tau_factor {
            kwargs.insert("tau_factor".into(), Value::from(tau));
        }
        if let Some(value) = self.gradient_error {
            kwargs.insert("epsilon1".into(), Value::from(value));
        }
        if let Some(value) = self.parameter_error {
            kwargs.insert("epsilon2".into(), Value::from(value));
        }
        if let Some(value) = self.error {
            kwargs.insert("epsilon3".into(), Value::from(value));
        }
        kwargs.insert("robust_loss_type".into(), Value::from("trivial"));
        kwargs.insert("robust_loss_scale".into(), Value::from(1.0));
        kwargs
    }

    /// Compile the step into its single action pair.
    ///
    /// # Arguments
    ///
    /// * `scene` - The scene to resolve markers and attributes in.
    /// * `markers` - The markers to measure.
    /// * `attrs` - The attributes to solve.
    /// * `with_validation` - Also build the validate action.
    ///
    /// # Returns
    ///
    /// The action pair, or `None` if nothing is left to solve.
    pub fn compile_action(
        &self,
        scene: &dyn SceneQuery,
        markers: &[Marker],
        attrs: &[Attribute],
        with_validation: bool,
    ) -> Result<Option<ActionPair>, SolverError> {
        if self.frame_list.is_empty() {
            return Err(SolverError::NotValid(format!(
                "Solver step has no frames; solver={}",
                self.name
            )));
        }

        let (marker_flags, camera_flags) = flags::markers_and_cameras(scene, markers);
        if marker_flags.is_empty() && camera_flags.is_empty() {
            log::warn!("No Markers or Cameras found!");
            return Ok(None);
        }

        let attr_flags = flags::attributes(
            scene,
            attrs,
            self.attributes_use_animated,
            self.attributes_use_static,
        )?;
        if attr_flags.is_empty() {
            log::warn!("No Attributes found!");
            return Ok(None);
        }

        let frames = filter_by_tags(self.frame_list.frames(), &self.frames_use_tags);
        if frames.is_empty() {
            log::warn!("No Frames found!");
            return Ok(None);
        }

        let mut kwargs = self.solve_kwargs();
        kwargs.insert("camera".into(), serde_json::to_value(&camera_flags)?);
        kwargs.insert("marker".into(), serde_json::to_value(&marker_flags)?);
        kwargs.insert("attr".into(), serde_json::to_value(&attr_flags)?);
        kwargs.insert("frame".into(), serde_json::to_value(&frames)?);

        let action = Action::new(FUNC_SOLVE, Vec::new(), kwargs);
        let vaction = with_validation.then(|| action.validate_variant());
        Ok(Some((action, vaction)))
    }
}

impl SolverCompile for SolverStep {
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError> {
        let pair = self.compile_action(scene, markers, attrs, with_validation)?;
        Ok(Box::new(pair.into_iter().map(Ok)))
    }

    fn frame_list(&self) -> Vec<Frame> {
        self.frame_list.frames().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use solvekit_scene::Scene;

    #[test]
    fn test_step_action() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        scene.set_marker_position(&mkr, 1, 0.0, 0.0)?;
        let attrs = vec![
            Attribute::new("bundle1", "translateX"),
            Attribute::new("camera1", "rotateY"),
        ];

        let step = SolverStep::new()
            .with_frame_list(FrameList::from_numbers([1, 2])?)
            .with_max_iterations(5)
            .with_verbose(true);
        let (action, vaction) = step
            .compile_action(&scene, &[mkr], &attrs, true)?
            .ok_or("no action")?;

        assert!(action.is_solve());
        assert!(action.args.is_empty());
        assert_eq!(action.kwarg("camera"), Some(&json!([["camera1", "cameraShape1"]])));
        assert_eq!(
            action.kwarg("marker"),
            Some(&json!([["marker1", "cameraShape1", "bundle1"]]))
        );
        assert_eq!(
            action.kwarg("attr"),
            Some(&json!([
                ["bundle1.translateX", "None", "None", "None", "None"],
                ["camera1.rotateY", "None", "None", "360.0", "None"],
            ]))
        );
        assert_eq!(action.kwarg("frame"), Some(&json!([1, 2])));
        assert_eq!(action.kwarg("iterations"), Some(&json!(5)));
        assert_eq!(action.kwarg("verbose"), Some(&json!(true)));
        assert_eq!(action.kwarg("auto_diff_type"), Some(&json!("forward")));
        assert_eq!(action.kwarg("robust_loss_type"), Some(&json!("trivial")));

        let vaction = vaction.ok_or("no validate action")?;
        assert_eq!(vaction.kwarg("verbose"), None);
        assert_eq!(vaction.kwarg("print_statistics"), Some(&json!(["inputs"])));
        Ok(())
    }

    #[test]
    fn test_step_without_attributes_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        let attrs = vec![Attribute::new("bundle1", "translateX")];

        // static attributes excluded
        let step = SolverStep::new()
            .with_frame_list(FrameList::from_numbers([1])?)
            .with_attributes_use_static(false);
        assert_eq!(step.compile_action(&scene, &[mkr.clone()], &attrs, false)?, None);

        // no frames left after tag filtering
        let mut frames = FrameList::new();
        frames.add(Frame::with_tags(1, ["ignored"]))?;
        let step = SolverStep::new().with_frame_list(frames);
        assert_eq!(step.compile_action(&scene, &[mkr.clone()], &attrs, false)?, None);

        let step = SolverStep::new();
        assert!(matches!(
            step.compile_action(&scene, &[mkr], &attrs, false),
            Err(SolverError::NotValid(_))
        ));
        Ok(())
    }

    #[test]
    fn test_step_data_roundtrip() -> Result<(), serde_json::Error> {
        let step = SolverStep::new().with_max_iterations(3).with_delta(-1.0);
        let value = serde_json::to_value(&step)?;
        assert_eq!(value["max_iterations"], json!(3));
        let decoded: SolverStep = serde_json::from_value(value)?;
        assert_eq!(decoded, step);

        // missing keys take their defaults
        let partial: SolverStep = serde_json::from_value(json!({"name": "lineup"}))?;
        assert_eq!(partial.name(), "lineup");
        assert_eq!(partial.max_iterations(), Some(20));
        Ok(())
    }
}
