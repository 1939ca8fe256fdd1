//! Action graph construction.
//!
//! A [`GraphBuilder`] accumulates actions with build-time skip flags and
//! produces an [`ActionGraph`]: nodes keyed by primary output name, edges
//! derived from declared parent actions, validated to be acyclic before any
//! scheduling happens.

use std::collections::HashMap;
use std::sync::Arc;

use crate::action::Action;

/// Structural graph errors.
///
/// These are fatal and reported before any node executes.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate action node: {0:?} (primary output names must be unique)")]
    DuplicateNode(String),

    #[error("action {node:?} depends on {output:?}, which no action produces")]
    UnknownDependency { node: String, output: String },

    #[error("action graph contains a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("action {0:?} declares no outputs")]
    NoOutputs(String),
}

/// A node in the action graph.
pub struct GraphNode {
    /// Node identity, derived from the action's primary declared output.
    pub id: String,
    /// Organizational label from the action.
    pub job_type: String,
    /// All declared output artifact names.
    pub outputs: Vec<String>,
    /// Ids of nodes this one depends on.
    pub depends_on: Vec<String>,
    /// Ids of nodes depending on this one.
    pub dependents: Vec<String>,
    /// Build-time skip flag (may be overridden by a name filter at run time).
    pub skip: bool,
    /// The action itself.
    pub action: Arc<dyn Action>,
}

impl GraphNode {
    /// Composite description string, the target for `--only` filtering.
    pub fn description(&self) -> String {
        format!("{} {}", self.job_type, self.outputs.join(" "))
    }
}

/// A validated, acyclic action graph.
///
/// Static once built: no nodes are inserted after construction.
pub struct ActionGraph {
    /// Project the actions live in (used for artifact name resolution).
    pub project: String,
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl ActionGraph {
    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Render a plain-text dump of nodes, skip flags, and edges.
    ///
    /// Debug aid only; never executes anything.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let state = if node.skip { "up-to-date" } else { "run" };
            out.push_str(&format!("[{}] {} ({})", node.job_type, node.id, state));
            if !node.depends_on.is_empty() {
                out.push_str(&format!(" <- {}", node.depends_on.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

/// Accumulates actions and their build-time run state.
pub struct GraphBuilder {
    project: String,
    entries: Vec<(Arc<dyn Action>, bool)>,
}

impl GraphBuilder {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entries: Vec::new(),
        }
    }

    /// Add an action, setting whether it should be skipped this run.
    ///
    /// Returns the action back so it can be wired as a parent of later ones.
    pub fn add(&mut self, action: Arc<dyn Action>, skip: bool) -> Arc<dyn Action> {
        self.entries.push((Arc::clone(&action), skip));
        action
    }

    /// Validate and build the graph.
    ///
    /// Checks node-id uniqueness, resolves every parent output to its
    /// declaring node, and rejects cyclic dependency structures.
    pub fn build(self) -> Result<ActionGraph, GraphError> {
        let mut nodes: Vec<GraphNode> = Vec::with_capacity(self.entries.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for (action, skip) in &self.entries {
            let outputs = action.outputs();
            let Some(primary) = outputs.first() else {
                return Err(GraphError::NoOutputs(action.job_type().to_string()));
            };
            let id = primary.clone();
            if index.contains_key(&id) {
                return Err(GraphError::DuplicateNode(id));
            }
            index.insert(id.clone(), nodes.len());
            nodes.push(GraphNode {
                id,
                job_type: action.job_type().to_string(),
                outputs,
                depends_on: Vec::new(),
                dependents: Vec::new(),
                skip: *skip,
                action: Arc::clone(action),
            });
        }

        // One dependency edge per parent, resolved through the parent's own
        // primary output. Resolving through secondary names is ambiguous:
        // a secondary may collide with another node's primary.
        for i in 0..nodes.len() {
            let mut depends_on = Vec::new();
            for parent in nodes[i].action.parents() {
                let parent_outputs = parent.outputs();
                let Some(primary) = parent_outputs.first() else {
                    return Err(GraphError::NoOutputs(parent.job_type().to_string()));
                };
                let Some(&owner_index) = index.get(primary) else {
                    return Err(GraphError::UnknownDependency {
                        node: nodes[i].id.clone(),
                        output: primary.clone(),
                    });
                };
                let owner = nodes[owner_index].id.clone();
                if !depends_on.contains(&owner) {
                    depends_on.push(owner);
                }
            }
            for dep in &depends_on {
                let dep_index = index[dep];
                let child_id = nodes[i].id.clone();
                nodes[dep_index].dependents.push(child_id);
            }
            nodes[i].depends_on = depends_on;
        }

        let graph = ActionGraph {
            project: self.project,
            nodes,
            index,
        };
        if let Some(cycle) = find_cycle(&graph) {
            return Err(GraphError::Cycle(cycle));
        }
        Ok(graph)
    }
}

/// Depth-first cycle search. Returns the offending path when one exists.
fn find_cycle(graph: &ActionGraph) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        graph: &ActionGraph,
        id: &str,
        marks: &mut HashMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(id).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return None,
            Mark::InProgress => {
                // Close the loop for a readable error message.
                let start = path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {}
        }

        marks.insert(id.to_string(), Mark::InProgress);
        path.push(id.to_string());
        if let Some(node) = graph.get(id) {
            for dep in &node.depends_on {
                if let Some(cycle) = visit(graph, dep, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(id.to_string(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for node in graph.nodes() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(graph, &node.id, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}
