use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use solvekit_compile::{
    action::{
        FUNC_CUT_KEYS, FUNC_EULER_FILTER, FUNC_KEY_TANGENT, FUNC_SOLVE, FUNC_TRIANGULATE_BUNDLE,
    },
    Action, Collection, SolverError,
};
use solvekit_scene::Scene;

use crate::{
    ops,
    problem::{kwarg, SolveOptions, SolveProblem},
    ExecError, ExecutionContext, SolveResult,
};

/// A function run for actions with a given name.
pub type Handler =
    fn(&mut Scene, &Action, &ExecutionContext) -> Result<Option<SolveResult>, ExecError>;

/// When validate actions are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidateMode {
    /// Validate every action before the first one runs.
    #[default]
    PreValidate,
    /// Validate each action just before it runs.
    AtRuntime,
    /// Never validate.
    None,
}

/// Settings of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// When validate actions are run.
    pub validate_mode: ValidateMode,
    /// Skip failing actions instead of stopping.
    pub continue_on_failure: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            validate_mode: ValidateMode::PreValidate,
            continue_on_failure: true,
        }
    }
}

/// Outcome of a validate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The paired execute action can run.
    Success,
    /// The paired execute action must be skipped.
    Failed,
}

/// The state reported by running one validate action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    /// Can the execute action run?
    pub status: ActionStatus,
    /// Message for the user.
    pub message: String,
    /// Number of residual values.
    pub error_number: usize,
    /// Number of solved parameters.
    pub parameter_number: usize,
    /// Number of frames solved.
    pub frames_number: usize,
    /// Frames solved, sorted.
    pub frames: Vec<i32>,
}

impl ActionState {
    fn new(status: ActionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            error_number: 0,
            parameter_number: 0,
            frames_number: 0,
            frames: Vec::new(),
        }
    }

    /// Did the validation succeed?
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

fn run_solve(
    scene: &mut Scene,
    action: &Action,
    ctx: &ExecutionContext,
) -> Result<Option<SolveResult>, ExecError> {
    let problem = SolveProblem::from_action(scene, action)?;
    let statistics: Vec<String> = kwarg(action, "print_statistics")?.unwrap_or_default();
    if statistics.iter().any(|s| s == "inputs") {
        return Ok(Some(problem.statistics()));
    }
    let options = SolveOptions::from_action(action)?;
    problem.solve(scene, &options, ctx).map(Some)
}

fn run_cut_keys(
    scene: &mut Scene,
    action: &Action,
    _ctx: &ExecutionContext,
) -> Result<Option<SolveResult>, ExecError> {
    ops::cut_keys(scene, action).map(|_| None)
}

fn run_key_tangent(
    scene: &mut Scene,
    action: &Action,
    _ctx: &ExecutionContext,
) -> Result<Option<SolveResult>, ExecError> {
    ops::key_tangent(scene, action).map(|_| None)
}

fn run_triangulate_bundle(
    scene: &mut Scene,
    action: &Action,
    _ctx: &ExecutionContext,
) -> Result<Option<SolveResult>, ExecError> {
    ops::triangulate_bundle(scene, action).map(|_| None)
}

fn run_euler_filter(
    scene: &mut Scene,
    action: &Action,
    _ctx: &ExecutionContext,
) -> Result<Option<SolveResult>, ExecError> {
    ops::euler_filter(scene, action).map(|_| None)
}

/// Runs compiled actions against an in-memory [`Scene`].
///
/// Example:
///
/// ```
/// use solvekit_exec::Executor;
/// use solvekit_scene::Scene;
///
/// let executor = Executor::new();
/// let mut scene = Scene::new();
/// let results = executor.execute(&mut scene, &[], &[]).unwrap();
/// assert!(results.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Executor {
    handlers: HashMap<String, Handler>,
    options: ExecuteOptions,
    ctx: ExecutionContext,
}

impl Default for Executor {
    fn default() -> Self {
        let mut executor = Self {
            handlers: HashMap::new(),
            options: ExecuteOptions::default(),
            ctx: ExecutionContext::new(),
        };
        executor.register(FUNC_SOLVE, run_solve);
        executor.register(FUNC_CUT_KEYS, run_cut_keys);
        executor.register(FUNC_KEY_TANGENT, run_key_tangent);
        executor.register(FUNC_TRIANGULATE_BUNDLE, run_triangulate_bundle);
        executor.register(FUNC_EULER_FILTER, run_euler_filter);
        executor
    }
}

impl Executor {
    /// Create an executor with the built-in handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given options.
    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Share running and interrupt flags with `ctx`.
    pub fn with_context(mut self, ctx: ExecutionContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// The execution context of this executor.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Register or replace the handler for an action function.
    pub fn register(&mut self, func: impl Into<String>, handler: Handler) {
        self.handlers.insert(func.into(), handler);
    }

    /// Run a single action.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::UnknownAction`] for unregistered functions, or
    /// the handler's error.
    pub fn run_action(
        &self,
        scene: &mut Scene,
        action: &Action,
    ) -> Result<Option<SolveResult>, ExecError> {
        let handler = self
            .handlers
            .get(&action.func)
            .ok_or_else(|| ExecError::UnknownAction(action.func.clone()))?;
        handler(scene, action, &self.ctx)
    }

    /// Run a validate action and report whether its execute action can run.
    ///
    /// A solve is valid when it has parameters, has residuals, and has no
    /// more parameters than residuals. Other actions are always valid.
    pub fn validate_action(&self, scene: &mut Scene, vaction: Option<&Action>) -> ActionState {
        let Some(vaction) = vaction else {
            return ActionState::new(ActionStatus::Success, "Action cannot be run.");
        };
        if vaction.func != FUNC_SOLVE {
            return ActionState::new(ActionStatus::Success, "Validated action.");
        }

        let mut frames: Vec<i32> = kwarg(vaction, "frame").ok().flatten().unwrap_or_default();
        frames.sort_unstable();
        if frames.is_empty() {
            return ActionState::new(
                ActionStatus::Failed,
                "Failed to validate number of frames: param=0 errors=0 frames=0",
            );
        }

        let stats = match self.run_action(scene, vaction) {
            Ok(Some(stats)) => stats,
            Ok(None) => SolveResult::default(),
            Err(err) => {
                let mut state = ActionState::new(ActionStatus::Failed, err.to_string());
                state.frames_number = frames.len();
                state.frames = frames;
                return state;
            }
        };
        let (params, errors) = (stats.number_of_parameters, stats.number_of_errors);
        let (status, message) = if params == 0 || errors == 0 || params > errors {
            (
                ActionStatus::Failed,
                format!("Invalid parameters and errors, skipping solve: {frames:?}"),
            )
        } else {
            (
                ActionStatus::Success,
                format!(
                    "Validated parameters, errors and frames: param={params} errors={errors} frames={}",
                    frames.len()
                ),
            )
        };
        ActionState {
            status,
            message,
            error_number: errors,
            parameter_number: params,
            frames_number: frames.len(),
            frames,
        }
    }

    /// Compile a collection with validation and run every validate action.
    ///
    /// An invalid collection yields a single failed state.
    pub fn validate(&self, scene: &mut Scene, collection: &Collection) -> Vec<ActionState> {
        let (_, vactions) = match collection.compile(&*scene, true) {
            Ok(compiled) => compiled,
            Err(err) => {
                log::warn!("{err}");
                return vec![ActionState::new(ActionStatus::Failed, err.to_string())];
            }
        };
        vactions
            .iter()
            .map(|v| self.validate_action(scene, v.as_ref()))
            .collect()
    }

    /// Run compiled actions in order.
    ///
    /// The context is marked running for the duration of the call, and the
    /// interrupt flag is checked between actions. Actions whose validation
    /// fails are skipped, or stop execution when `continue_on_failure` is
    /// off.
    ///
    /// # Arguments
    ///
    /// * `scene` - The scene to modify.
    /// * `actions` - The execute actions.
    /// * `vactions` - The validate actions, one per execute action.
    ///
    /// # Returns
    ///
    /// The results of the solves that ran.
    pub fn execute(
        &self,
        scene: &mut Scene,
        actions: &[Action],
        vactions: &[Option<Action>],
    ) -> Result<Vec<SolveResult>, ExecError> {
        if actions.len() != vactions.len() {
            return Err(ExecError::InvalidArgument(format!(
                "{} actions but {} validate actions",
                actions.len(),
                vactions.len()
            )));
        }
        let _running = self.ctx.start()?;

        let pre_states: Vec<ActionState> = match self.options.validate_mode {
            ValidateMode::PreValidate => vactions
                .iter()
                .map(|v| self.validate_action(scene, v.as_ref()))
                .collect(),
            _ => Vec::new(),
        };

        let mut results = Vec::new();
        let mut reported: HashSet<String> = HashSet::new();
        for (i, (action, vaction)) in actions.iter().zip(vactions).enumerate() {
            if self.ctx.is_interrupted() {
                log::warn!("Execution interrupted before action {i}");
                break;
            }

            let state = match self.options.validate_mode {
                ValidateMode::PreValidate => pre_states.get(i).cloned(),
                ValidateMode::AtRuntime if vaction.is_some() => {
                    Some(self.validate_action(scene, vaction.as_ref()))
                }
                _ => None,
            };
            if let Some(state) = state.filter(|s| !s.is_success()) {
                if !self.options.continue_on_failure {
                    return Err(ExecError::ValidationFailed(state.message));
                }
                if reported.insert(state.message.clone()) {
                    log::warn!("{}", state.message);
                }
                continue;
            }

            log::debug!("Running action {i}: {}", action.func);
            match self.run_action(scene, action) {
                Ok(Some(result)) => {
                    let interrupted = result.user_interrupted;
                    log::info!(
                        "Solved frames {:?}: error={:e} ({})",
                        result.frame_list,
                        result.final_error(),
                        result.stop_message
                    );
                    results.push(result);
                    if interrupted {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) if self.options.continue_on_failure => {
                    log::warn!("Action {i} ({}) failed: {err}", action.func);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }

    /// Compile a collection and run its actions.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Compile`] if the collection is not valid.
    pub fn execute_collection(
        &self,
        scene: &mut Scene,
        collection: &Collection,
    ) -> Result<Vec<SolveResult>, ExecError> {
        let with_validation = self.options.validate_mode != ValidateMode::None;
        let (actions, vactions) = collection
            .compile(&*scene, with_validation)
            .map_err(|e: SolverError| {
                log::warn!("{e}");
                ExecError::from(e)
            })?;
        log::info!(
            "Executing {} actions of collection {}",
            actions.len(),
            collection.name
        );
        self.execute(scene, &actions, &vactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn action(func: &str, kwargs: Value) -> Action {
        let kwargs = match kwargs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Action::new(func, Vec::new(), kwargs)
    }

    #[test]
    fn test_unknown_action() {
        let executor = Executor::new();
        let mut scene = Scene::new();
        let result = executor.run_action(&mut scene, &action("render", json!({})));
        assert!(matches!(result, Err(ExecError::UnknownAction(_))));
    }

    #[test]
    fn test_validate_action_counts() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        scene.set_marker_position(&mkr, 1, 0.0, 0.0)?;
        let executor = Executor::new();

        let attr = |name: &str| json!([name, "None", "None", "None", "None"]);
        let valid = action(
            "solve",
            json!({
                "marker": [["marker1", "cameraShape1", "bundle1"]],
                "attr": [attr("bundle1.translateX"), attr("bundle1.translateY")],
                "frame": [1],
                "print_statistics": ["inputs"],
            }),
        );
        let state = executor.validate_action(&mut scene, Some(&valid));
        assert!(state.is_success(), "{}", state.message);
        assert_eq!((state.parameter_number, state.error_number), (2, 2));

        // three parameters against two residuals
        let mut too_many = valid.clone();
        too_many.kwargs.insert(
            "attr".into(),
            json!([
                attr("bundle1.translateX"),
                attr("bundle1.translateY"),
                attr("bundle1.translateZ")
            ]),
        );
        let state = executor.validate_action(&mut scene, Some(&too_many));
        assert_eq!(state.status, ActionStatus::Failed);

        let mut no_frames = valid.clone();
        no_frames.kwargs.insert("frame".into(), json!([]));
        assert!(!executor.validate_action(&mut scene, Some(&no_frames)).is_success());
        assert!(executor.validate_action(&mut scene, None).is_success());
        Ok(())
    }

    #[test]
    fn test_execute_stops_on_failure() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let actions = [action("render", json!({}))];
        let vactions = [None];

        let executor = Executor::new();
        assert!(executor.execute(&mut scene, &actions, &vactions)?.is_empty());
        assert!(!executor.context().is_running());

        let strict = Executor::new().with_options(ExecuteOptions {
            validate_mode: ValidateMode::None,
            continue_on_failure: false,
        });
        assert!(strict.execute(&mut scene, &actions, &vactions).is_err());
        assert!(!strict.context().is_running());

        assert!(matches!(
            executor.execute(&mut scene, &actions, &[]),
            Err(ExecError::InvalidArgument(_))
        ));
        Ok(())
    }
}
