//! DAG runner.
//!
//! The Runner is responsible for:
//! - topological scheduling over a static [`ActionGraph`]
//! - parallel execution of ready nodes (bounded by `max_parallel`)
//! - skip/filter resolution and failure propagation
//!
//! Debug-only operations (`--graph`, `--list-actions`) short-circuit before
//! any node executes and are reported as explicit [`RunOutcome`] variants
//! rather than control-flow errors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::action::ActionError;
use crate::graph::{ActionGraph, GraphNode};
use crate::tracker::{JobContext, TrackerFactory};

const DEFAULT_MAX_PARALLEL: usize = 4;

/// Node state during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet eligible to execute.
    Pending,
    /// Currently executing.
    Running,
    /// Execution completed successfully.
    Completed,
    /// Declared or filtered out; satisfies dependents without running.
    Skipped,
    /// Execution failed.
    Failed,
    /// A transitive dependency failed; never executed.
    Blocked,
}

/// Scheduler-facing run options.
///
/// These correspond to CLI flags; parsing them is out of scope here.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Substring filters. When set, a node runs iff its description contains
    /// at least one entry; this overrides declared skip flags both ways.
    pub only: Option<Vec<String>>,
    /// Dump the graph and exit without executing.
    pub graph: bool,
    /// List node descriptions and exit without executing.
    pub list_actions: bool,
    /// Tags attached to every launched job (pass-through only).
    pub tags: BTreeSet<String>,
}

impl RunOptions {
    /// Parse a comma-separated `--only` filter value.
    pub fn with_only_csv(mut self, csv: &str) -> Self {
        let filters: Vec<String> = csv
            .split(',')
            .map(|piece| piece.trim().to_string())
            .filter(|piece| !piece.is_empty())
            .collect();
        self.only = (!filters.is_empty()).then_some(filters);
        self
    }
}

/// What a call to [`Runner::execute`] produced.
pub enum RunOutcome {
    /// `--graph`: the textual graph dump; nothing was executed.
    GraphDump(String),
    /// `--list-actions`: node descriptions; nothing was executed.
    Listing(Vec<String>),
    /// A real run finished (possibly with failures).
    Finished(RunReport),
}

/// Per-node results of a finished run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Final state per node id.
    pub states: BTreeMap<String, NodeState>,
    /// Error messages for failed nodes.
    pub errors: BTreeMap<String, String>,
}

impl RunReport {
    fn ids_in(&self, state: NodeState) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn completed(&self) -> Vec<&str> {
        self.ids_in(NodeState::Completed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_in(NodeState::Skipped)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_in(NodeState::Failed)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.ids_in(NodeState::Blocked)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .states
                .values()
                .all(|s| matches!(s, NodeState::Completed | NodeState::Skipped))
    }
}

/// Executes an [`ActionGraph`] in dependency order.
pub struct Runner {
    graph: ActionGraph,
    tracker_factory: Arc<dyn TrackerFactory>,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(graph: ActionGraph, tracker_factory: Arc<dyn TrackerFactory>) -> Self {
        Self {
            graph,
            tracker_factory,
            max_parallel: DEFAULT_MAX_PARALLEL,
            cancel: CancellationToken::new(),
        }
    }

    /// Bound the number of concurrently running nodes.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Use an external cancellation token.
    ///
    /// Cancelling stops launching new nodes; in-flight nodes run to
    /// completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Node descriptions in graph order.
    pub fn list_actions(&self) -> Vec<String> {
        self.graph.nodes().iter().map(GraphNode::description).collect()
    }

    /// Run the graph (or short-circuit for the debug options).
    pub async fn execute(&self, options: RunOptions) -> RunOutcome {
        if options.graph {
            return RunOutcome::GraphDump(self.graph.dump());
        }
        if options.list_actions {
            return RunOutcome::Listing(self.list_actions());
        }

        let run_id = uuid::Uuid::new_v4();
        tracing::info!(run_id = %run_id, nodes = self.graph.len(), "run started");

        let skip_flags = self.effective_skips(options.only.as_deref());
        let mut states: HashMap<String, NodeState> = self
            .graph
            .nodes()
            .iter()
            .map(|node| (node.id.clone(), NodeState::Pending))
            .collect();
        let mut report = RunReport::default();

        loop {
            let ready = self.ready_nodes(&states);
            if ready.is_empty() {
                break;
            }

            // Resolve skips first: skipped parents satisfy their children
            // without occupying an execution slot.
            let mut runnable = Vec::new();
            for id in ready {
                if skip_flags[&id] {
                    tracing::info!(node_id = %id, "action skipped");
                    states.insert(id, NodeState::Skipped);
                } else {
                    runnable.push(id);
                }
            }
            if runnable.is_empty() {
                continue;
            }

            if self.cancel.is_cancelled() {
                tracing::warn!("run cancelled; not launching further actions");
                break;
            }

            let batch: Vec<String> = runnable.into_iter().take(self.max_parallel).collect();
            let mut in_flight = FuturesUnordered::new();
            for id in batch {
                let Some(node) = self.graph.get(&id) else {
                    continue;
                };
                states.insert(id.clone(), NodeState::Running);
                tracing::info!(
                    node_id = %id,
                    job_type = %node.job_type,
                    "action started"
                );

                let tracker = self.tracker_factory.tracker_for(self.job_context(node, &options));
                let action = Arc::clone(&node.action);
                in_flight.push(async move {
                    let result = action.run(tracker).await;
                    (id, result)
                });
            }

            while let Some((id, result)) = in_flight.next().await {
                match result {
                    Ok(()) => {
                        tracing::info!(node_id = %id, "action completed");
                        states.insert(id, NodeState::Completed);
                    }
                    Err(error) => {
                        tracing::error!(node_id = %id, error = %error, "action failed");
                        report.errors.insert(id.clone(), error.to_string());
                        states.insert(id.clone(), NodeState::Failed);
                        self.block_dependents(&id, &mut states);
                    }
                }
            }
        }

        for (id, state) in states {
            report.states.insert(id, state);
        }
        tracing::info!(
            run_id = %run_id,
            completed = report.completed().len(),
            skipped = report.skipped().len(),
            failed = report.failed().len(),
            "run finished"
        );
        RunOutcome::Finished(report)
    }

    fn job_context(&self, node: &GraphNode, options: &RunOptions) -> JobContext {
        JobContext::new(self.graph.project.clone())
            .with_job_type(node.job_type.clone())
            .with_job_group(node.action.job_group().map(str::to_string))
            .with_tags(options.tags.clone())
            .with_config(node.action.config())
    }

    /// Compute the effective skip flag per node.
    ///
    /// An active name filter overrides declared flags entirely: a node runs
    /// iff any filter substring appears in its description.
    fn effective_skips(&self, only: Option<&[String]>) -> HashMap<String, bool> {
        self.graph
            .nodes()
            .iter()
            .map(|node| {
                let skip = match only {
                    Some(filters) => {
                        let description = node.description();
                        let selected = filters
                            .iter()
                            .any(|filter| description.contains(filter.trim()));
                        if selected != !node.skip {
                            tracing::debug!(
                                node_id = %node.id,
                                selected,
                                "filter overrides declared skip flag"
                            );
                        }
                        !selected
                    }
                    None => node.skip,
                };
                (node.id.clone(), skip)
            })
            .collect()
    }

    /// Nodes whose dependencies are all satisfied (completed or skipped).
    fn ready_nodes(&self, states: &HashMap<String, NodeState>) -> Vec<String> {
        self.graph
            .nodes()
            .iter()
            .filter(|node| states[&node.id] == NodeState::Pending)
            .filter(|node| {
                node.depends_on.iter().all(|dep| {
                    matches!(states[dep], NodeState::Completed | NodeState::Skipped)
                })
            })
            .map(|node| node.id.clone())
            .collect()
    }

    /// Mark every transitive dependent of a failed node as blocked.
    fn block_dependents(&self, failed: &str, states: &mut HashMap<String, NodeState>) {
        let mut stack = vec![failed.to_string()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.graph.get(&id) else {
                continue;
            };
            for dependent in &node.dependents {
                if states[dependent] == NodeState::Pending {
                    tracing::warn!(
                        node_id = %dependent,
                        failed_dependency = %id,
                        "action blocked by failed dependency"
                    );
                    states.insert(dependent.clone(), NodeState::Blocked);
                    stack.push(dependent.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::graph::GraphBuilder;
    use crate::tracker::{ArtifactHandle, OutputSpec, Tracker, TrackerError};
    use crate::types::Artifact;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct NoopTracker;

    #[async_trait]
    impl Tracker for NoopTracker {
        async fn declare_output(&self, spec: OutputSpec) -> Result<Artifact, TrackerError> {
            Err(TrackerError::EmptyOutput(spec.name))
        }

        async fn declare_input(
            &self,
            _artifact: ArtifactHandle,
            _use_as: Option<&str>,
        ) -> Result<Vec<PathBuf>, TrackerError> {
            Ok(Vec::new())
        }

        async fn log_metrics(
            &self,
            _metrics: BTreeMap<String, Value>,
        ) -> Result<(), TrackerError> {
            Ok(())
        }
    }

    struct NoopTrackerFactory;

    impl TrackerFactory for NoopTrackerFactory {
        fn tracker_for(&self, _job: JobContext) -> Arc<dyn Tracker> {
            Arc::new(NoopTracker)
        }
    }

    /// Records execution order and optionally fails.
    struct RecordingAction {
        job_type: String,
        outputs: Vec<String>,
        parents: Vec<Arc<dyn Action>>,
        order: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingAction {
        fn new(
            job_type: &str,
            output: &str,
            parents: Vec<Arc<dyn Action>>,
            order: Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                job_type: job_type.to_string(),
                outputs: vec![output.to_string()],
                parents,
                order,
                fail: false,
            })
        }

        fn failing(
            job_type: &str,
            output: &str,
            parents: Vec<Arc<dyn Action>>,
            order: Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                job_type: job_type.to_string(),
                outputs: vec![output.to_string()],
                parents,
                order,
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Action for RecordingAction {
        fn job_type(&self) -> &str {
            &self.job_type
        }

        fn outputs(&self) -> Vec<String> {
            self.outputs.clone()
        }

        fn parents(&self) -> &[Arc<dyn Action>] {
            &self.parents
        }

        async fn run(&self, _tracker: Arc<dyn Tracker>) -> Result<(), ActionError> {
            self.order.lock().unwrap().push(self.outputs[0].clone());
            if self.fail {
                Err(ActionError::failed("intentional failure"))
            } else {
                Ok(())
            }
        }
    }

    fn runner(graph: crate::graph::ActionGraph) -> Runner {
        Runner::new(graph, Arc::new(NoopTrackerFactory))
    }

    #[tokio::test]
    async fn test_dependency_order_respected() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        let a = builder.add(RecordingAction::new("munge", "a", vec![], order.clone()), false);
        let b = builder.add(
            RecordingAction::new("train", "b", vec![a.clone()], order.clone()),
            false,
        );
        builder.add(RecordingAction::new("evaluate", "c", vec![b], order.clone()), false);

        let outcome = runner(builder.build().unwrap())
            .execute(RunOptions::default())
            .await;
        let RunOutcome::Finished(report) = outcome else {
            panic!("expected a finished run");
        };
        assert!(report.is_success());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_skipped_parent_satisfies_child() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        let a = builder.add(RecordingAction::new("munge", "a", vec![], order.clone()), true);
        builder.add(RecordingAction::new("train", "b", vec![a], order.clone()), false);

        let RunOutcome::Finished(report) = runner(builder.build().unwrap())
            .execute(RunOptions::default())
            .await
        else {
            panic!("expected a finished run");
        };
        assert_eq!(report.skipped(), vec!["a"]);
        assert_eq!(report.completed(), vec!["b"]);
        // The skipped parent never executed.
        assert_eq!(*order.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_failure_blocks_transitive_dependents_only() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        let bad = builder.add(RecordingAction::failing("munge", "bad", vec![], order.clone()), false);
        let child = builder.add(
            RecordingAction::new("train", "child", vec![bad], order.clone()),
            false,
        );
        builder.add(
            RecordingAction::new("evaluate", "grandchild", vec![child], order.clone()),
            false,
        );
        // Independent branch still runs.
        builder.add(RecordingAction::new("munge", "other", vec![], order.clone()), false);

        let RunOutcome::Finished(report) = runner(builder.build().unwrap())
            .execute(RunOptions::default())
            .await
        else {
            panic!("expected a finished run");
        };
        assert_eq!(report.failed(), vec!["bad"]);
        assert_eq!(report.blocked(), vec!["child", "grandchild"]);
        assert_eq!(report.completed(), vec!["other"]);
        assert!(report.errors["bad"].contains("intentional failure"));
    }

    #[tokio::test]
    async fn test_filter_overrides_declared_skip_both_ways() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        // Declared to run, but the filter doesn't match it.
        builder.add(RecordingAction::new("munge", "unmatched", vec![], order.clone()), false);
        // Declared skipped, but the filter matches it.
        builder.add(RecordingAction::new("train", "wanted", vec![], order.clone()), true);

        let options = RunOptions::default().with_only_csv("wanted");
        let RunOutcome::Finished(report) = runner(builder.build().unwrap()).execute(options).await
        else {
            panic!("expected a finished run");
        };
        assert_eq!(report.completed(), vec!["wanted"]);
        assert_eq!(report.skipped(), vec!["unmatched"]);
        assert_eq!(*order.lock().unwrap(), vec!["wanted"]);
    }

    #[tokio::test]
    async fn test_filter_matches_job_type() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        builder.add(RecordingAction::new("munge", "a", vec![], order.clone()), false);
        builder.add(RecordingAction::new("train", "b", vec![], order.clone()), false);

        // Descriptions are "job_type outputs", so job types are filterable.
        let options = RunOptions::default().with_only_csv("train");
        let RunOutcome::Finished(report) = runner(builder.build().unwrap()).execute(options).await
        else {
            panic!("expected a finished run");
        };
        assert_eq!(report.completed(), vec!["b"]);
        assert_eq!(report.skipped(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_graph_and_listing_short_circuit() {
        let counter = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        builder.add(RecordingAction::new("munge", "a", vec![], counter.clone()), false);
        let graph = builder.build().unwrap();
        let runner = runner(graph);

        let outcome = runner
            .execute(RunOptions {
                graph: true,
                ..Default::default()
            })
            .await;
        assert!(matches!(outcome, RunOutcome::GraphDump(_)));

        let outcome = runner
            .execute(RunOptions {
                list_actions: true,
                ..Default::default()
            })
            .await;
        match outcome {
            RunOutcome::Listing(descriptions) => {
                assert_eq!(descriptions, vec!["munge a".to_string()]);
            }
            _ => panic!("expected a listing"),
        }
        // Neither debug operation executed anything.
        assert!(counter.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_launches() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        let a = builder.add(RecordingAction::new("munge", "a", vec![], order.clone()), false);
        builder.add(RecordingAction::new("train", "b", vec![a], order.clone()), false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let RunOutcome::Finished(report) = runner(builder.build().unwrap())
            .with_cancellation(cancel)
            .execute(RunOptions::default())
            .await
        else {
            panic!("expected a finished run");
        };
        // Nothing launched at all.
        assert!(order.lock().unwrap().is_empty());
        assert!(report
            .states
            .values()
            .all(|state| *state == NodeState::Pending));
    }

    #[tokio::test]
    async fn test_wide_graph_completes_with_small_parallel_bound() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut builder = GraphBuilder::new("proj");
        for name in ["w", "x", "y", "z"] {
            builder.add(RecordingAction::new("munge", name, vec![], order.clone()), false);
        }
        let RunOutcome::Finished(report) = runner(builder.build().unwrap())
            .with_max_parallel(1)
            .execute(RunOptions::default())
            .await
        else {
            panic!("expected a finished run");
        };
        assert_eq!(report.completed().len(), 4);
        assert_eq!(order.lock().unwrap().len(), 4);
    }
}
