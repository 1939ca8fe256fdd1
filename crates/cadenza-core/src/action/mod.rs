//! Action abstraction.
//!
//! Actions are the unit of trackable pipeline work: each declares the actions
//! it depends on, the artifact names it will produce, and a run routine that
//! receives a [`Tracker`] handle for declaring inputs and outputs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::tracker::{Tracker, TrackerError};
use crate::types::{NameError, OverrideTable};

/// Action execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A specific piece of pipeline work to track.
///
/// `job_type` and `job_group` are organizational labels; `job_group` is the
/// more general of the two and semantics are up to project conventions.
#[async_trait]
pub trait Action: Send + Sync {
    /// Label describing what this action does (e.g. "munge", "evaluate").
    fn job_type(&self) -> &str;

    /// Broader grouping label (e.g. "build", "model").
    fn job_group(&self) -> Option<&str> {
        None
    }

    /// Artifact names this action will produce after running.
    ///
    /// The first element is the action's primary identifier in the graph.
    fn outputs(&self) -> Vec<String>;

    /// Actions that must run before this one.
    fn parents(&self) -> &[Arc<dyn Action>];

    /// Action-specific configuration, recorded with the run.
    ///
    /// If the action were a function call these would be its parameters
    /// (e.g. hyperparameters).
    fn config(&self) -> Value {
        Value::Null
    }

    /// Execute this action.
    async fn run(&self, tracker: Arc<dyn Tracker>) -> Result<(), ActionError>;
}

/// Resolved input and output artifact names for an action.
pub struct ResolvedIo {
    /// Parent outputs, resolved against the project and override table.
    pub inputs: Vec<String>,
    /// Own declared outputs (unresolved).
    pub outputs: Vec<String>,
}

/// Resolve an action's IO the way its tracker will see it.
pub fn resolved_io(
    action: &dyn Action,
    project: &str,
    overrides: &OverrideTable,
) -> Result<ResolvedIo, NameError> {
    let mut inputs = Vec::new();
    for parent in action.parents() {
        for output in parent.outputs() {
            inputs.push(overrides.resolve(&output, Some(project))?);
        }
    }
    Ok(ResolvedIo {
        inputs,
        outputs: action.outputs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Leaf;

    #[async_trait]
    impl Action for Leaf {
        fn job_type(&self) -> &str {
            "munge"
        }

        fn outputs(&self) -> Vec<String> {
            vec!["raw-data".to_string()]
        }

        fn parents(&self) -> &[Arc<dyn Action>] {
            &[]
        }

        async fn run(&self, _tracker: Arc<dyn Tracker>) -> Result<(), ActionError> {
            Ok(())
        }
    }

    struct Child {
        parents: Vec<Arc<dyn Action>>,
    }

    #[async_trait]
    impl Action for Child {
        fn job_type(&self) -> &str {
            "train"
        }

        fn outputs(&self) -> Vec<String> {
            vec!["model".to_string()]
        }

        fn parents(&self) -> &[Arc<dyn Action>] {
            &self.parents
        }

        async fn run(&self, _tracker: Arc<dyn Tracker>) -> Result<(), ActionError> {
            Ok(())
        }
    }

    #[test]
    fn test_resolved_io_resolves_parent_outputs() {
        let leaf: Arc<dyn Action> = Arc::new(Leaf);
        let child = Child {
            parents: vec![leaf],
        };
        let io = resolved_io(&child, "proj", &OverrideTable::new()).unwrap();
        assert_eq!(io.inputs, vec!["proj/raw-data:latest".to_string()]);
        assert_eq!(io.outputs, vec!["model".to_string()]);
    }
}
