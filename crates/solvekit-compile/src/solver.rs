use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use solvekit_scene::{Attribute, Frame, Marker, SceneQuery};

use crate::{
    ActionPair, SolverBasic, SolverError, SolverStandard, SolverStep, SolverTriangulate,
};

/// A lazy, fail-fast sequence of compiled action pairs.
///
/// The first `Err` item ends the sequence.
pub type ActionIter<'a> = Box<dyn Iterator<Item = Result<ActionPair, SolverError>> + 'a>;

/// A strategy that compiles markers and attributes into actions.
pub trait SolverCompile {
    /// Compile into a fresh sequence of action pairs.
    ///
    /// Every call returns a new sequence. Structural problems found before
    /// any action is built are returned as `Err` instead of an iterator.
    ///
    /// # Arguments
    ///
    /// * `scene` - The scene to resolve markers and attributes in.
    /// * `markers` - The markers to measure.
    /// * `attrs` - The attributes to solve.
    /// * `with_validation` - Also build validate actions.
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError>;

    /// Frames the strategy solves, used to key the compile cache.
    fn frame_list(&self) -> Vec<Frame>;
}

/// A configured strategy, selected by its `type` tag when persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Solver {
    /// A single solver invocation.
    Step(SolverStep),
    /// The multi-stage root frame strategy.
    Standard(SolverStandard),
    /// Per-frame animated solves.
    Basic(SolverBasic),
    /// Bundle triangulation.
    Triangulate(SolverTriangulate),
}

impl Solver {
    /// Name of the strategy.
    pub fn name(&self) -> &str {
        match self {
            Solver::Step(s) => s.name(),
            Solver::Standard(s) => s.name(),
            Solver::Basic(s) => s.name(),
            Solver::Triangulate(s) => s.name(),
        }
    }

    /// Is the strategy used when compiling a collection?
    pub fn enabled(&self) -> bool {
        match self {
            Solver::Step(s) => s.enabled(),
            Solver::Standard(s) => s.enabled(),
            Solver::Basic(s) => s.enabled(),
            Solver::Triangulate(s) => s.enabled(),
        }
    }

    /// Enable or disable the strategy.
    pub fn set_enabled(&mut self, enabled: bool) {
        match self {
            Solver::Step(s) => s.set_enabled(enabled),
            Solver::Standard(s) => s.set_enabled(enabled),
            Solver::Basic(s) => s.set_enabled(enabled),
            Solver::Triangulate(s) => s.set_enabled(enabled),
        }
    }

    /// Encode the strategy as a plain key-value map, including its `type`.
    pub fn to_data(&self) -> Result<Map<String, Value>, SolverError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(SolverError::NotValid(format!(
                "Solver data is not a mapping: {other}"
            ))),
        }
    }

    /// Decode a strategy from a key-value map.
    ///
    /// Missing keys take their default values.
    pub fn from_data(data: Map<String, Value>) -> Result<Self, SolverError> {
        let solver: Solver = serde_json::from_value(Value::Object(data))?;
        solver.check()?;
        Ok(solver)
    }

    fn check(&self) -> Result<(), SolverError> {
        match self {
            Solver::Standard(s) => s.check(),
            Solver::Basic(s) => s.check(),
            Solver::Step(_) | Solver::Triangulate(_) => Ok(()),
        }
    }

    fn as_compile(&self) -> &dyn SolverCompile {
        match self {
            Solver::Step(s) => s,
            Solver::Standard(s) => s,
            Solver::Basic(s) => s,
            Solver::Triangulate(s) => s,
        }
    }
}

impl SolverCompile for Solver {
    fn compile<'a>(
        &'a self,
        scene: &'a dyn SceneQuery,
        markers: &'a [Marker],
        attrs: &'a [Attribute],
        with_validation: bool,
    ) -> Result<ActionIter<'a>, SolverError> {
        if markers.is_empty() {
            return Err(SolverError::NotValid(format!(
                "Solver is not valid, no Markers given; solver={}",
                self.name()
            )));
        }
        if attrs.is_empty() {
            return Err(SolverError::NotValid(format!(
                "Solver is not valid, no Attributes given; solver={}",
                self.name()
            )));
        }
        let resolvable = markers
            .iter()
            .any(|m| scene.marker_bundle(m).is_some() && scene.marker_camera(m).is_some());
        if !resolvable {
            return Err(SolverError::NotValid(format!(
                "Solver is not valid, no Markers with a Bundle and Camera; solver={}",
                self.name()
            )));
        }
        self.as_compile().compile(scene, markers, attrs, with_validation)
    }

    fn frame_list(&self) -> Vec<Frame> {
        self.as_compile().frame_list()
    }
}

impl From<SolverStep> for Solver {
    fn from(s: SolverStep) -> Self {
        Solver::Step(s)
    }
}

impl From<SolverStandard> for Solver {
    fn from(s: SolverStandard) -> Self {
        Solver::Standard(s)
    }
}

impl From<SolverBasic> for Solver {
    fn from(s: SolverBasic) -> Self {
        Solver::Basic(s)
    }
}

impl From<SolverTriangulate> for Solver {
    fn from(s: SolverTriangulate) -> Self {
        Solver::Triangulate(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_solver_data_roundtrip() -> Result<(), SolverError> {
        let mut standard = SolverStandard::new();
        standard.set_global_solve(true);
        standard.set_root_iteration_num(7)?;
        let solver = Solver::from(standard);

        let data = solver.to_data()?;
        assert_eq!(data.get("type"), Some(&json!("standard")));
        assert_eq!(data.get("root_iteration_num"), Some(&json!(7)));
        assert_eq!(Solver::from_data(data)?, solver);
        Ok(())
    }

    #[test]
    fn test_solver_data_defaults() -> Result<(), SolverError> {
        let data = json!({"type": "standard", "name": "main"});
        let Value::Object(map) = data else {
            unreachable!()
        };
        let solver = Solver::from_data(map)?;
        assert_eq!(solver.name(), "main");
        assert!(solver.enabled());
        let Solver::Standard(standard) = solver else {
            panic!("expected a standard solver");
        };
        assert_eq!(standard.root_iteration_num(), 20);
        assert_eq!(standard.anim_iteration_num(), 10);
        Ok(())
    }

    #[test]
    fn test_solver_data_rejects_zero_iterations() {
        let data = json!({"type": "standard", "block_iteration_num": 0});
        if let Value::Object(map) = data {
            assert!(matches!(Solver::from_data(map), Err(SolverError::NotValid(_))));
        }
    }
}
