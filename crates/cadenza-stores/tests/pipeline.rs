//! End-to-end pipeline runs over real store backends.
//!
//! Drives a small munge-then-train graph through the runner twice: once
//! against the remote-backed tracker (in-memory object store + cache +
//! recorder) and once against the local-only fake tracker.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use cadenza_core::action::{Action, ActionError};
use cadenza_core::graph::GraphBuilder;
use cadenza_core::remote::RemoteObjectStore;
use cadenza_core::runner::{RunOptions, RunOutcome, Runner};
use cadenza_core::tracker::{OutputSpec, RunRecorder, Tracker, TrackerFactory};
use cadenza_core::types::ObjectRef;
use cadenza_stores::{
    Cache, FakeTrackerFactory, InMemoryObjectStore, InMemoryRunRecorder,
    ObjectStoreTrackerFactory,
};

const PROJECT: &str = "demo";

/// Writes a small dataset file and declares it as the "raw-data" artifact.
struct MungeAction {
    work_dir: PathBuf,
    contents: Vec<u8>,
}

#[async_trait]
impl Action for MungeAction {
    fn job_type(&self) -> &str {
        "munge"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["raw-data".to_string()]
    }

    fn parents(&self) -> &[Arc<dyn Action>] {
        &[]
    }

    async fn run(&self, tracker: Arc<dyn Tracker>) -> Result<(), ActionError> {
        let path = self.work_dir.join("raw.txt");
        fs::write(&path, &self.contents).map_err(|e| ActionError::failed(e.to_string()))?;
        tracker
            .declare_output(
                OutputSpec::new(
                    "raw-data",
                    vec![path],
                    ObjectRef::new("bucket", "datasets"),
                    "dataset",
                )
                .with_strip_prefix(&self.work_dir),
            )
            .await?;
        Ok(())
    }
}

/// Consumes "raw-data", upcases it, and declares the result as "model".
struct TrainAction {
    work_dir: PathBuf,
    input_name: String,
    parents: Vec<Arc<dyn Action>>,
}

#[async_trait]
impl Action for TrainAction {
    fn job_type(&self) -> &str {
        "train"
    }

    fn outputs(&self) -> Vec<String> {
        vec!["model".to_string()]
    }

    fn parents(&self) -> &[Arc<dyn Action>] {
        &self.parents
    }

    async fn run(&self, tracker: Arc<dyn Tracker>) -> Result<(), ActionError> {
        let inputs = tracker
            .declare_input(self.input_name.as_str().into(), Some("training data"))
            .await?;
        let raw = fs::read_to_string(&inputs[0]).map_err(|e| ActionError::failed(e.to_string()))?;

        let path = self.work_dir.join("model.txt");
        fs::write(&path, raw.to_uppercase()).map_err(|e| ActionError::failed(e.to_string()))?;
        tracker
            .declare_output(
                OutputSpec::new(
                    "model",
                    vec![path],
                    ObjectRef::new("bucket", "models"),
                    "model",
                )
                .with_strip_prefix(&self.work_dir),
            )
            .await?;
        tracker
            .log_metrics(BTreeMap::from([(
                "input_bytes".to_string(),
                raw.len().into(),
            )]))
            .await?;
        Ok(())
    }
}

fn pipeline(
    work_dir: &std::path::Path,
    input_name: &str,
    contents: &[u8],
) -> cadenza_core::graph::ActionGraph {
    let mut builder = GraphBuilder::new(PROJECT);
    let munge = builder.add(
        Arc::new(MungeAction {
            work_dir: work_dir.to_path_buf(),
            contents: contents.to_vec(),
        }),
        false,
    );
    builder.add(
        Arc::new(TrainAction {
            work_dir: work_dir.to_path_buf(),
            input_name: input_name.to_string(),
            parents: vec![munge],
        }),
        false,
    );
    builder.build().unwrap()
}

#[tokio::test]
async fn test_remote_backed_pipeline() {
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryObjectStore::new());
    let recorder = Arc::new(InMemoryRunRecorder::new());
    let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
    let factory = Arc::new(ObjectStoreTrackerFactory::new(
        Arc::clone(&remote) as Arc<dyn RemoteObjectStore>,
        Arc::clone(&cache),
        Arc::clone(&recorder) as Arc<dyn RunRecorder>,
    ));

    let graph = pipeline(work_dir.path(), "demo/raw-data:latest", b"some rows");
    let RunOutcome::Finished(report) = Runner::new(graph, factory.clone())
        .execute(RunOptions::default())
        .await
    else {
        panic!("expected a finished run");
    };
    assert!(report.is_success(), "errors: {:?}", report.errors);
    assert_eq!(report.completed(), vec!["model", "raw-data"]);

    // Both stages uploaded exactly one version.
    assert_eq!(
        remote.version_count(&ObjectRef::new("bucket", "datasets/raw.txt")),
        1
    );
    assert_eq!(
        remote.version_count(&ObjectRef::new("bucket", "models/model.txt")),
        1
    );

    // The trained model saw the munged contents.
    let fetched = remote
        .get(&ObjectRef::new("bucket", "models/model.txt"), None)
        .await
        .unwrap();
    assert_eq!(fetched.bytes.as_ref(), b"SOME ROWS");

    // Both artifacts registered, with the input and metric recorded.
    assert_eq!(recorder.outputs().len(), 2);
    assert_eq!(
        recorder.inputs(),
        vec![(
            "demo/raw-data:latest".to_string(),
            Some("training data".to_string())
        )]
    );
    assert_eq!(recorder.metrics().len(), 1);
}

#[tokio::test]
async fn test_rerun_with_unchanged_content_uploads_nothing() {
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(InMemoryObjectStore::new());
    let recorder = Arc::new(InMemoryRunRecorder::new());
    let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
    let factory = Arc::new(ObjectStoreTrackerFactory::new(
        Arc::clone(&remote) as Arc<dyn RemoteObjectStore>,
        cache,
        recorder as Arc<dyn RunRecorder>,
    ));

    for _ in 0..2 {
        let graph = pipeline(work_dir.path(), "demo/raw-data:latest", b"same rows");
        let RunOutcome::Finished(report) = Runner::new(graph, factory.clone())
            .execute(RunOptions::default())
            .await
        else {
            panic!("expected a finished run");
        };
        assert!(report.is_success(), "errors: {:?}", report.errors);
    }

    // The second run found every checksum in the cache and reused v1.
    assert_eq!(
        remote.version_count(&ObjectRef::new("bucket", "datasets/raw.txt")),
        1
    );
    assert_eq!(
        remote.version_count(&ObjectRef::new("bucket", "models/model.txt")),
        1
    );
}

#[tokio::test]
async fn test_fake_pipeline_never_touches_a_remote() {
    let cache_dir = tempfile::tempdir().unwrap();
    let work_dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
    let factory = Arc::new(FakeTrackerFactory::new(Arc::clone(&cache)));

    let graph = pipeline(work_dir.path(), "demo/raw-data:latest", b"fake rows");
    let RunOutcome::Finished(report) = Runner::new(graph, factory as Arc<dyn TrackerFactory>)
        .execute(RunOptions::default())
        .await
    else {
        panic!("expected a finished run");
    };
    assert!(report.is_success(), "errors: {:?}", report.errors);

    // Everything landed in the cache under the fake version.
    let model_path = cache_dir
        .path()
        .join("bucket")
        .join("models")
        .join("model.txt")
        .join("fake");
    assert_eq!(fs::read(&model_path).unwrap(), b"FAKE ROWS");
}
