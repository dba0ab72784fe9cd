use std::path::Path;

use serde::{Deserialize, Serialize};
use solvekit_scene::{Attribute, Marker, SceneQuery};

use crate::{Action, Solver, SolverCompile, SolverError};

/// A named set of strategies, markers and attributes solved together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Name of the collection, used in error messages.
    pub name: String,
    /// Strategies compiled in order.
    #[serde(default)]
    pub solvers: Vec<Solver>,
    /// Markers measured by every strategy.
    #[serde(default)]
    pub markers: Vec<Marker>,
    /// Attributes solved by every strategy.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a strategy.
    pub fn add_solver(&mut self, solver: impl Into<Solver>) {
        self.solvers.push(solver.into());
    }

    /// Remove every strategy with the given name.
    pub fn remove_solver(&mut self, name: &str) {
        self.solvers.retain(|s| s.name() != name);
    }

    /// Append a marker, ignoring markers already present.
    pub fn add_marker(&mut self, marker: Marker) {
        if !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
    }

    /// Remove a marker.
    pub fn remove_marker(&mut self, marker: &Marker) {
        self.markers.retain(|m| m != marker);
    }

    /// Replace all markers.
    pub fn set_markers(&mut self, markers: Vec<Marker>) {
        self.markers.clear();
        markers.into_iter().for_each(|m| self.add_marker(m));
    }

    /// Append an attribute, ignoring attributes with the same name.
    pub fn add_attribute(&mut self, attr: Attribute) {
        if !self.attributes.iter().any(|a| a.name() == attr.name()) {
            self.attributes.push(attr);
        }
    }

    /// Remove the attribute with the same name.
    pub fn remove_attribute(&mut self, attr: &Attribute) {
        let name = attr.name();
        self.attributes.retain(|a| a.name() != name);
    }

    /// Replace all attributes.
    pub fn set_attributes(&mut self, attrs: Vec<Attribute>) {
        self.attributes.clear();
        attrs.into_iter().for_each(|a| self.add_attribute(a));
    }

    /// Compile every enabled strategy, see [`compile_collection`].
    pub fn compile(
        &self,
        scene: &dyn SceneQuery,
        with_validation: bool,
    ) -> Result<(Vec<Action>, Vec<Option<Action>>), SolverError> {
        compile_collection(
            &self.name,
            &self.solvers,
            &self.markers,
            &self.attributes,
            scene,
            with_validation,
        )
    }

    /// Decode a collection from JSON.
    pub fn from_json(text: &str) -> Result<Self, SolverError> {
        let collection: Collection = serde_json::from_str(text)?;
        for solver in &collection.solvers {
            Solver::from_data(solver.to_data()?)?;
        }
        Ok(collection)
    }

    /// Encode the collection as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, SolverError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read a collection from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SolverError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SolverError::Scene(e.into()))?;
        Self::from_json(&text)
    }

    /// Write the collection to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SolverError> {
        std::fs::write(path.as_ref(), self.to_json()?).map_err(|e| SolverError::Scene(e.into()))
    }
}

/// Compile the enabled strategies of a collection into parallel lists of
/// execute and validate actions.
///
/// # Arguments
///
/// * `collection` - Name of the collection, embedded in error messages.
/// * `solvers` - The strategies, compiled in order when enabled.
/// * `markers` - The markers measured by every strategy.
/// * `attrs` - The attributes solved by every strategy.
/// * `scene` - The scene to resolve markers and attributes in.
/// * `with_validation` - Also build validate actions.
///
/// # Returns
///
/// Execute actions and validate actions, of equal length.
///
/// # Errors
///
/// Fails with [`SolverError::NotValid`] before compiling anything if there
/// are no strategies, no enabled strategies, no markers or no attributes.
pub fn compile_collection(
    collection: &str,
    solvers: &[Solver],
    markers: &[Marker],
    attrs: &[Attribute],
    scene: &dyn SceneQuery,
    with_validation: bool,
) -> Result<(Vec<Action>, Vec<Option<Action>>), SolverError> {
    if solvers.is_empty() {
        return Err(SolverError::NotValid(format!(
            "Collection is not valid, no Solvers given; collection={collection}"
        )));
    }
    let enabled: Vec<&Solver> = solvers.iter().filter(|s| s.enabled()).collect();
    if enabled.is_empty() {
        return Err(SolverError::NotValid(format!(
            "Collection is not valid, no enabled Solvers given; collection={collection}"
        )));
    }
    if markers.is_empty() {
        return Err(SolverError::NotValid(format!(
            "Collection is not valid, no Markers given; collection={collection}"
        )));
    }
    if attrs.is_empty() {
        return Err(SolverError::NotValid(format!(
            "Collection is not valid, no Attributes given; collection={collection}"
        )));
    }

    let mut actions = Vec::new();
    let mut vactions = Vec::new();
    for solver in enabled {
        log::debug!("Compiling solver {} of collection {collection}", solver.name());
        for item in solver.compile(scene, markers, attrs, with_validation)? {
            let (action, vaction) = item?;
            actions.push(action);
            vactions.push(vaction);
        }
    }
    debug_assert_eq!(actions.len(), vactions.len());
    log::info!("Compiled {} actions; collection={collection}", actions.len());
    Ok((actions, vactions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameList, SolverStep};
    use solvekit_scene::{Scene, SceneError};

    fn scene() -> Result<(Scene, Marker), SceneError> {
        let mut scene = Scene::new();
        let cam = scene.add_camera("camera1", "cameraShape1")?;
        let bnd = scene.add_bundle("bundle1")?;
        let mkr = scene.add_marker("marker1", &cam, Some(&bnd))?;
        scene.set_marker_position(&mkr, 1, 0.0, 0.0)?;
        Ok((scene, mkr))
    }

    #[test]
    fn test_not_valid_messages() -> Result<(), Box<dyn std::error::Error>> {
        let (scene, mkr) = scene()?;
        let mut col = Collection::new("collection1");
        let err = col.compile(&scene, true).err().ok_or("expected error")?;
        assert_eq!(
            err.to_string(),
            "Collection is not valid, no Solvers given; collection=collection1"
        );

        let mut step = SolverStep::new().with_frame_list(FrameList::from_numbers([1])?);
        step.set_enabled(false);
        col.add_solver(step.clone());
        let err = col.compile(&scene, true).err().ok_or("expected error")?;
        assert!(err.to_string().contains("no enabled Solvers"));

        step.set_enabled(true);
        col.add_solver(step);
        let err = col.compile(&scene, true).err().ok_or("expected error")?;
        assert!(err.to_string().contains("no Markers"));

        col.add_marker(mkr);
        let err = col.compile(&scene, true).err().ok_or("expected error")?;
        assert!(err.to_string().contains("no Attributes"));

        col.add_attribute(Attribute::new("bundle1", "translateX"));
        let (actions, vactions) = col.compile(&scene, true)?;
        assert_eq!(actions.len(), 1);
        assert_eq!(vactions.len(), 1);
        Ok(())
    }

    #[test]
    fn test_collection_json_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let (_, mkr) = scene()?;
        let mut col = Collection::new("collection1");
        col.add_solver(SolverStep::new().with_frame_list(FrameList::from_numbers([1, 2])?));
        col.add_marker(mkr.clone());
        col.add_marker(mkr);
        col.add_attribute(Attribute::new("bundle1", "translateX").with_bounds(Some(0.0), None));
        assert_eq!(col.markers.len(), 1);

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("collection.json");
        col.save(&path)?;
        let loaded = Collection::load(&path)?;
        assert_eq!(loaded, col);
        Ok(())
    }
}
