use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Run a bundle adjustment solve.
pub const FUNC_SOLVE: &str = "solve";
/// Remove keyframes on attributes within a frame range.
pub const FUNC_CUT_KEYS: &str = "cut_keys";
/// Change keyframe tangents on attributes within a frame range.
pub const FUNC_KEY_TANGENT: &str = "key_tangent";
/// Seed a bundle position from marker rays.
pub const FUNC_TRIANGULATE_BUNDLE: &str = "triangulate_bundle";
/// Unwrap rotation curves to remove 360 degree flips.
pub const FUNC_EULER_FILTER: &str = "euler_filter";

/// An execute action paired with its optional validate action.
pub type ActionPair = (Action, Option<Action>);

/// A deferred invocation of an executor function.
///
/// The action is plain data: the function name is resolved by the executor
/// and the arguments are JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Name of the function to run.
    pub func: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Action {
    /// Create a new action.
    pub fn new(func: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            func: func.into(),
            args,
            kwargs,
        }
    }

    /// Returns true if the action runs a solve.
    pub fn is_solve(&self) -> bool {
        self.func == FUNC_SOLVE
    }

    /// Look up a keyword argument.
    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// The dry-run variant of a solve action.
    ///
    /// Same function and arguments, without `verbose` and `debug_file`, and
    /// asking the solver to print its input statistics instead of solving.
    pub fn validate_variant(&self) -> Action {
        let mut kwargs = self.kwargs.clone();
        kwargs.remove("debug_file");
        kwargs.remove("verbose");
        kwargs.insert(
            "print_statistics".to_string(),
            Value::from(vec![Value::from("inputs")]),
        );
        Action::new(self.func.clone(), self.args.clone(), kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_variant() {
        let mut kwargs = Map::new();
        kwargs.insert("frame".to_string(), json!([1, 2]));
        kwargs.insert("verbose".to_string(), json!(true));
        kwargs.insert("debug_file".to_string(), json!("/tmp/debug.log"));
        let action = Action::new(FUNC_SOLVE, vec![], kwargs);

        let vaction = action.validate_variant();
        assert_eq!(vaction.func, FUNC_SOLVE);
        assert_eq!(vaction.kwarg("frame"), Some(&json!([1, 2])));
        assert_eq!(vaction.kwarg("verbose"), None);
        assert_eq!(vaction.kwarg("debug_file"), None);
        assert_eq!(vaction.kwarg("print_statistics"), Some(&json!(["inputs"])));
        // the source action is untouched
        assert_eq!(action.kwarg("verbose"), Some(&json!(true)));
    }
}
