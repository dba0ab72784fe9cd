//! Reprojection least squares built from a `solve` action.
//!
//! Parameters are the unlocked attributes named by the action, one per frame
//! for animated attributes. Residuals are the weighted film-space offsets
//! between each enabled marker and the projection of its bundle.
//!
//! The problem is minimised with a Levenberg-Marquardt loop over the damped
//! normal equations `(J^T J + λI) δ = -J^T r`, with a finite difference
//! Jacobian.

use std::time::Instant;

use faer::prelude::SpSolver;
use serde::de::DeserializeOwned;
use solvekit_compile::{
    flags::{AttrFlag, MarkerFlag},
    step::AutoDiffType,
    Action,
};
use solvekit_scene::{AttrState, Attribute, Bundle, Camera, Marker, Scene, SceneQuery};

use crate::{ErrorStats, ExecError, ExecutionContext, SolveResult, TimerStats};

/// Residual used for an observation whose bundle is behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e3;

/// Read an optional keyword argument of an action.
pub(crate) fn kwarg<T: DeserializeOwned>(action: &Action, key: &str) -> Result<Option<T>, ExecError> {
    match action.kwarg(key) {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ExecError::InvalidArgument(format!("{key}: {e}"))),
    }
}

/// Levenberg-Marquardt settings read from a `solve` action.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions {
    /// Maximum number of iterations.
    pub iterations: usize,
    /// Finite difference step.
    pub delta: f64,
    /// Finite difference scheme.
    pub auto_diff_type: AutoDiffType,
    /// Scale of the initial damping relative to the largest `J^T J` diagonal.
    pub tau_factor: f64,
    /// Stop when the largest gradient component falls below this.
    pub gradient_tolerance: f64,
    /// Stop when the relative step size falls below this.
    pub parameter_tolerance: f64,
    /// Stop when the average error falls below this.
    pub error_tolerance: f64,
    /// Log every iteration at info level.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            iterations: 20,
            delta: 1e-4,
            auto_diff_type: AutoDiffType::Forward,
            tau_factor: 1e-3,
            gradient_tolerance: 1e-6,
            parameter_tolerance: 1e-6,
            error_tolerance: 1e-6,
            verbose: false,
        }
    }
}

impl SolveOptions {
    /// Read the options from the keyword arguments of a `solve` action,
    /// missing keys take their default values.
    pub fn from_action(action: &Action) -> Result<Self, ExecError> {
        let d = Self::default();
        Ok(Self {
            iterations: kwarg(action, "iterations")?.unwrap_or(d.iterations),
            delta: kwarg(action, "delta")?.unwrap_or(d.delta),
            auto_diff_type: kwarg(action, "auto_diff_type")?.unwrap_or(d.auto_diff_type),
            tau_factor: kwarg(action, "tau_factor")?.unwrap_or(d.tau_factor),
            gradient_tolerance: kwarg(action, "epsilon1")?.unwrap_or(d.gradient_tolerance),
            parameter_tolerance: kwarg(action, "epsilon2")?.unwrap_or(d.parameter_tolerance),
            error_tolerance: kwarg(action, "epsilon3")?.unwrap_or(d.error_tolerance),
            verbose: kwarg(action, "verbose")?.unwrap_or(d.verbose),
        })
    }
}

#[derive(Debug, Clone)]
struct Parameter {
    attr: Attribute,
    frame: i32,
    min: Option<f64>,
    max: Option<f64>,
}

impl Parameter {
    fn clamp(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}

#[derive(Debug, Clone)]
struct Observation {
    marker: String,
    camera: Camera,
    bundle: Bundle,
    frame: i32,
    weight: f64,
    target: [f64; 2],
}

/// A reprojection problem over a set of frames.
#[derive(Debug, Clone)]
pub struct SolveProblem {
    parameters: Vec<Parameter>,
    observations: Vec<Observation>,
    frames: Vec<i32>,
}

impl SolveProblem {
    /// Build the problem described by a `solve` action.
    ///
    /// # Errors
    ///
    /// Fails if the action has no frames, or a marker has no camera.
    pub fn from_action(scene: &Scene, action: &Action) -> Result<Self, ExecError> {
        let mut frames: Vec<i32> = kwarg(action, "frame")?.unwrap_or_default();
        frames.sort_unstable();
        frames.dedup();
        if frames.is_empty() {
            return Err(ExecError::InvalidArgument("solve action has no frames".into()));
        }
        let marker_flags: Vec<MarkerFlag> = kwarg(action, "marker")?.unwrap_or_default();
        let attr_flags: Vec<AttrFlag> = kwarg(action, "attr")?.unwrap_or_default();

        let mut observations = Vec::new();
        for MarkerFlag(node, _, bundle) in marker_flags {
            let marker = Marker::new(node.as_str());
            let camera = scene
                .marker_camera(&marker)
                .ok_or_else(|| ExecError::InvalidArgument(format!("marker {node} has no camera")))?;
            for &frame in &frames {
                let weight = scene.marker_weight(&marker, frame);
                if !scene.marker_enabled(&marker, frame) || weight <= 0.0 {
                    continue;
                }
                let Some(target) = scene.marker_position(&marker, frame) else {
                    continue;
                };
                observations.push(Observation {
                    marker: node.clone(),
                    camera: camera.clone(),
                    bundle: Bundle::new(bundle.as_str()),
                    frame,
                    weight,
                    target,
                });
            }
        }

        let mut parameters = Vec::new();
        for flag in &attr_flags {
            let attr = Attribute::from_name(flag.name()).ok_or_else(|| {
                ExecError::InvalidArgument(format!("bad attribute name {}", flag.name()))
            })?;
            let param = |frame| Parameter {
                attr: attr.clone(),
                frame,
                min: flag.min_value(),
                max: flag.max_value(),
            };
            match scene.attr_state(&attr) {
                AttrState::Animated => parameters.extend(frames.iter().map(|&f| param(f))),
                AttrState::Static => parameters.push(param(frames[0])),
                state => log::warn!("Skipping attribute {} in state {state:?}", attr.name()),
            }
        }

        Ok(Self {
            parameters,
            observations,
            frames,
        })
    }

    /// Number of solved parameter values.
    pub fn number_of_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// Number of residual values, two per observation.
    pub fn number_of_errors(&self) -> usize {
        self.observations.len() * 2
    }

    /// Frames of the problem, sorted.
    pub fn frames(&self) -> &[i32] {
        &self.frames
    }

    fn read_values(&self, scene: &Scene) -> Result<Vec<f64>, ExecError> {
        self.parameters
            .iter()
            .map(|p| scene.value(&p.attr, p.frame).map_err(ExecError::from))
            .collect()
    }

    fn write_values(&self, scene: &mut Scene, values: &[f64]) -> Result<(), ExecError> {
        for (p, v) in self.parameters.iter().zip(values) {
            scene.set_value(&p.attr, p.frame, *v)?;
        }
        Ok(())
    }

    fn residuals(&self, scene: &Scene) -> Result<Vec<f64>, ExecError> {
        let mut residuals = Vec::with_capacity(self.number_of_errors());
        for obs in &self.observations {
            let pose = scene.camera_pose(&obs.camera, obs.frame)?;
            let point = scene.bundle_position(&obs.bundle, obs.frame)?;
            match pose.project(&point) {
                Some(p) => {
                    residuals.push((p[0] - obs.target[0]) * obs.weight);
                    residuals.push((p[1] - obs.target[1]) * obs.weight);
                }
                None => residuals.extend([BEHIND_CAMERA_RESIDUAL; 2]),
            }
        }
        Ok(residuals)
    }

    fn evaluate(
        &self,
        scene: &mut Scene,
        values: &[f64],
        timers: &mut TimerStats,
    ) -> Result<Vec<f64>, ExecError> {
        let start = Instant::now();
        self.write_values(scene, values)?;
        let residuals = self.residuals(scene)?;
        timers.function_seconds += start.elapsed().as_secs_f64();
        timers.function_calls += 1;
        Ok(residuals)
    }

    /// Unweighted film-space distance per observation.
    fn deviations(&self, residuals: &[f64]) -> Vec<f64> {
        self.observations
            .iter()
            .zip(residuals.chunks_exact(2))
            .map(|(obs, r)| r[0].hypot(r[1]) / obs.weight)
            .collect()
    }

    fn jacobian(
        &self,
        scene: &mut Scene,
        values: &[f64],
        residuals: &[f64],
        options: &SolveOptions,
        timers: &mut TimerStats,
    ) -> Result<faer::Mat<f64>, ExecError> {
        let start = Instant::now();
        let mut jac = faer::Mat::<f64>::zeros(residuals.len(), values.len());
        let mut probe = values.to_vec();
        for (j, param) in self.parameters.iter().enumerate() {
            // step away from a bound that would clamp the probe
            let h = match param.max {
                Some(max) if values[j] + options.delta > max => -options.delta,
                _ => options.delta,
            };
            probe[j] = values[j] + h;
            let forward = self.evaluate(scene, &probe, timers)?;
            match options.auto_diff_type {
                AutoDiffType::Forward => {
                    for (i, (f, r)) in forward.iter().zip(residuals).enumerate() {
                        jac.write(i, j, (f - r) / h);
                    }
                }
                AutoDiffType::Central => {
                    probe[j] = values[j] - h;
                    let backward = self.evaluate(scene, &probe, timers)?;
                    for (i, (f, b)) in forward.iter().zip(&backward).enumerate() {
                        jac.write(i, j, (f - b) / (2.0 * h));
                    }
                }
            }
            probe[j] = values[j];
        }
        self.write_values(scene, values)?;
        timers.jacobian_seconds += start.elapsed().as_secs_f64();
        timers.jacobian_calls += 1;
        Ok(jac)
    }

    /// Minimise the reprojection error, writing the best values found into
    /// the scene.
    ///
    /// The interrupt flag of `ctx` is checked before every iteration.
    ///
    /// # Errors
    ///
    /// Fails if the problem has no parameters or no residuals, or if the
    /// scene cannot be evaluated.
    pub fn solve(
        &self,
        scene: &mut Scene,
        options: &SolveOptions,
        ctx: &ExecutionContext,
    ) -> Result<SolveResult, ExecError> {
        let start = Instant::now();
        let n = self.number_of_parameters();
        let m = self.number_of_errors();
        if n == 0 || m == 0 {
            return Err(ExecError::SolveFailed(format!(
                "nothing to solve; parameters={n} errors={m}"
            )));
        }

        let mut timers = TimerStats::default();
        let mut values = self.read_values(scene)?;
        let mut residuals = self.evaluate(scene, &values, &mut timers)?;
        let mut cost: f64 = residuals.iter().map(|r| r * r).sum();
        let initial = mean(&self.deviations(&residuals));

        let mut lambda: Option<f64> = None;
        let mut iterations = 0;
        let mut user_interrupted = false;
        let mut stop_message = "maximum iterations reached".to_string();

        while iterations < options.iterations {
            if ctx.is_interrupted() {
                user_interrupted = true;
                stop_message = "user interrupted".into();
                break;
            }
            if mean(&self.deviations(&residuals)) <= options.error_tolerance {
                stop_message = "error below tolerance".into();
                break;
            }

            let jac = self.jacobian(scene, &values, &residuals, options, &mut timers)?;
            let mut r = faer::Mat::<f64>::zeros(m, 1);
            for (i, v) in residuals.iter().enumerate() {
                r.write(i, 0, *v);
            }
            let jtj = jac.transpose() * jac.as_ref();
            let jtr = jac.transpose() * r.as_ref();

            let gradient_max = (0..n).map(|i| jtr.read(i, 0).abs()).fold(0.0, f64::max);
            if gradient_max <= options.gradient_tolerance {
                stop_message = "gradient below tolerance".into();
                break;
            }

            let damping = *lambda.get_or_insert_with(|| {
                let diag_max = (0..n).map(|i| jtj.read(i, i)).fold(0.0, f64::max);
                (options.tau_factor * diag_max).max(1e-12)
            });

            let mut hessian = jtj.clone();
            for i in 0..n {
                hessian.write(i, i, jtj.read(i, i) + damping);
            }
            let delta = hessian.partial_piv_lu().solve(-jtr.as_ref());
            let step: Vec<f64> = (0..n).map(|i| delta.read(i, 0)).collect();
            iterations += 1;

            if step.iter().any(|s| !s.is_finite()) {
                lambda = Some(damping * 10.0);
                continue;
            }
            let step_norm = norm(&step);
            if step_norm <= options.parameter_tolerance * (norm(&values) + options.parameter_tolerance)
            {
                stop_message = "parameter change below tolerance".into();
                break;
            }

            let candidate: Vec<f64> = self
                .parameters
                .iter()
                .zip(values.iter().zip(&step))
                .map(|(p, (v, s))| p.clamp(v + s))
                .collect();
            let candidate_residuals = self.evaluate(scene, &candidate, &mut timers)?;
            let candidate_cost: f64 = candidate_residuals.iter().map(|r| r * r).sum();

            if candidate_cost < cost {
                values = candidate;
                residuals = candidate_residuals;
                cost = candidate_cost;
                lambda = Some((damping / 10.0).max(1e-12));
            } else {
                lambda = Some(damping * 10.0);
                if damping * 10.0 > 1e10 {
                    stop_message = "damping exceeded maximum".into();
                    break;
                }
            }
            if options.verbose {
                log::info!("iteration {iterations}: cost={cost:e} lambda={damping:e}");
            } else {
                log::debug!("iteration {iterations}: cost={cost:e} lambda={damping:e}");
            }
        }
        self.write_values(scene, &values)?;
        timers.solve_seconds = start.elapsed().as_secs_f64();
        Ok(self.result(residuals, initial, iterations, user_interrupted, stop_message, timers))
    }

    /// Counts of the problem without solving, used by validate actions.
    pub fn statistics(&self) -> SolveResult {
        SolveResult {
            success: true,
            stop_message: "inputs".into(),
            number_of_parameters: self.number_of_parameters(),
            number_of_errors: self.number_of_errors(),
            frame_list: self.frames.clone(),
            ..Default::default()
        }
    }

    fn result(
        &self,
        residuals: Vec<f64>,
        initial: f64,
        iterations: usize,
        user_interrupted: bool,
        stop_message: String,
        timer_stats: TimerStats,
    ) -> SolveResult {
        let deviations = self.deviations(&residuals);
        let mut result = SolveResult {
            success: !user_interrupted && deviations.iter().all(|d| d.is_finite()),
            stop_message,
            iterations,
            user_interrupted,
            error_stats: ErrorStats {
                initial,
                final_average: mean(&deviations),
                final_maximum: deviations.iter().copied().fold(0.0, f64::max),
                final_minimum: deviations.iter().copied().fold(f64::INFINITY, f64::min),
            },
            timer_stats,
            number_of_parameters: self.number_of_parameters(),
            number_of_errors: self.number_of_errors(),
            frame_list: self.frames.clone(),
            ..Default::default()
        };

        for (obs, dev) in self.observations.iter().zip(&deviations) {
            result
                .marker_error_list
                .entry(obs.marker.clone())
                .or_default()
                .insert(obs.frame, *dev);
        }
        for frame in &self.frames {
            let on_frame: Vec<f64> = self
                .observations
                .iter()
                .zip(&deviations)
                .filter(|(obs, _)| obs.frame == *frame)
                .map(|(_, d)| *d)
                .collect();
            if !on_frame.is_empty() {
                result.frame_error_list.insert(*frame, mean(&on_frame));
            }
        }
        result
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::{json, Map};

    fn solve_action(kwargs: serde_json::Value) -> Action {
        let serde_json::Value::Object(map) = kwargs else {
            return Action::new("solve", Vec::new(), Map::new());
        };
        Action::new("solve", Vec::new(), map)
    }

    fn scene() -> Result<Scene, Box<dyn std::error::Error>> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        scene.set_bundle_position(&bnd, 1, [1.0, 0.5, -10.0])?;
        scene.set_marker_position(&mkr, 1, 0.0, 0.0)?;
        scene.set_marker_position(&mkr, 2, 0.0, 0.0)?;
        Ok(scene)
    }

    #[test]
    fn test_options_from_action() -> Result<(), ExecError> {
        let action = solve_action(json!({
            "iterations": 5,
            "auto_diff_type": "central",
            "epsilon1": 1e-3,
        }));
        let options = SolveOptions::from_action(&action)?;
        assert_eq!(options.iterations, 5);
        assert_eq!(options.auto_diff_type, AutoDiffType::Central);
        assert_relative_eq!(options.gradient_tolerance, 1e-3);
        assert_relative_eq!(options.delta, 1e-4);

        let bad = solve_action(json!({"iterations": "many"}));
        assert!(matches!(
            SolveOptions::from_action(&bad),
            Err(ExecError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn test_problem_counts() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = scene()?;
        scene.set_keyframe(&Attribute::new("camera1", "translateX"), 1, 0.0)?;
        let action = solve_action(json!({
            "marker": [["marker1", "cameraShape1", "bundle1"]],
            "attr": [
                ["bundle1.translateX", "None", "None", "None", "None"],
                ["camera1.translateX", "None", "None", "None", "None"],
            ],
            "frame": [2, 1],
        }));
        let problem = SolveProblem::from_action(&scene, &action)?;
        // one static value plus one value per frame for the animated one
        assert_eq!(problem.number_of_parameters(), 3);
        assert_eq!(problem.number_of_errors(), 4);
        assert_eq!(problem.frames(), &[1, 2]);
        Ok(())
    }

    #[test]
    fn test_solve_reduces_error() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = scene()?;
        let action = solve_action(json!({
            "marker": [["marker1", "cameraShape1", "bundle1"]],
            "attr": [
                ["bundle1.translateX", "None", "None", "None", "None"],
                ["bundle1.translateY", "None", "None", "None", "None"],
            ],
            "frame": [1],
            "iterations": 20,
        }));
        let problem = SolveProblem::from_action(&scene, &action)?;
        let options = SolveOptions::from_action(&action)?;
        let result = problem.solve(&mut scene, &options, &ExecutionContext::new())?;
        assert!(result.success);
        assert!(result.final_error() < result.error_stats.initial);
        assert!(result.final_error() < 1e-4);

        let tx = scene.value(&Attribute::new("bundle1", "translateX"), 1)?;
        assert_relative_eq!(tx, 0.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_solve_respects_bounds() -> Result<(), Box<dyn std::error::Error>> {
        let mut scene = scene()?;
        let action = solve_action(json!({
            "marker": [["marker1", "cameraShape1", "bundle1"]],
            "attr": [["bundle1.translateX", "0.5", "None", "None", "None"]],
            "frame": [1],
        }));
        let problem = SolveProblem::from_action(&scene, &action)?;
        problem.solve(&mut scene, &SolveOptions::default(), &ExecutionContext::new())?;
        let tx = scene.value(&Attribute::new("bundle1", "translateX"), 1)?;
        assert!(tx >= 0.5);
        Ok(())
    }
}
