//! In-memory run recorder.
//!
//! Captures outputs, inputs, and metrics without talking to any external
//! tracking service. Used in tests and in dev mode where run history does
//! not need to outlive the process.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;

use cadenza_core::tracker::{JobContext, RunRecorder, TrackerError};
use cadenza_core::types::{Artifact, ArtifactName, LATEST_VERSION};

#[derive(Default)]
struct Log {
    outputs: Vec<(String, Artifact)>,
    inputs: Vec<(String, Option<String>)>,
    metrics: Vec<BTreeMap<String, Value>>,
    symbolic: BTreeMap<String, Artifact>,
}

/// [`RunRecorder`] that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryRunRecorder {
    log: Mutex<Log>,
}

impl InMemoryRunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` resolvable to `artifact` through [`RunRecorder::resolve_symbolic`].
    pub fn register_symbolic(&self, name: impl Into<String>, artifact: Artifact) {
        let name = name.into();
        let key = Self::canonical(&name).unwrap_or(name);
        let mut log = self.lock();
        log.symbolic.insert(key, artifact);
    }

    /// Recorded outputs as `(project, artifact)` pairs.
    pub fn outputs(&self) -> Vec<(String, Artifact)> {
        self.lock().outputs.clone()
    }

    /// Recorded inputs as `(name, use_as)` pairs, in declaration order.
    pub fn inputs(&self) -> Vec<(String, Option<String>)> {
        self.lock().inputs.clone()
    }

    /// Recorded metric batches, in logging order.
    pub fn metrics(&self) -> Vec<BTreeMap<String, Value>> {
        self.lock().metrics.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Canonical lookup key: org dropped, version defaulted to "latest".
    fn canonical(name: &str) -> Result<String, TrackerError> {
        let mut parsed = ArtifactName::parse(name)?;
        parsed.org = None;
        if parsed.version.is_none() {
            parsed.version = Some(LATEST_VERSION.to_string());
        }
        Ok(parsed.to_string())
    }
}

#[async_trait]
impl RunRecorder for InMemoryRunRecorder {
    async fn record_output(
        &self,
        job: &JobContext,
        artifact: &Artifact,
        _metadata: &BTreeMap<String, Value>,
    ) -> Result<(), TrackerError> {
        let mut log = self.lock();
        log.outputs.push((job.project.clone(), artifact.clone()));
        // Later nodes in the same process resolve this output by its
        // fully qualified "latest" name.
        let qualified = format!("{}/{}:{}", job.project, artifact.name, LATEST_VERSION);
        log.symbolic.insert(qualified, artifact.clone());
        Ok(())
    }

    async fn record_input(&self, name: &str, use_as: Option<&str>) -> Result<(), TrackerError> {
        let mut log = self.lock();
        log.inputs
            .push((name.to_string(), use_as.map(str::to_string)));
        Ok(())
    }

    async fn record_metrics(
        &self,
        _job: &JobContext,
        metrics: &BTreeMap<String, Value>,
    ) -> Result<(), TrackerError> {
        let mut log = self.lock();
        log.metrics.push(metrics.clone());
        Ok(())
    }

    async fn resolve_symbolic(&self, name: &str) -> Result<Artifact, TrackerError> {
        let key = Self::canonical(name)?;
        let log = self.lock();
        log.symbolic
            .get(&key)
            .cloned()
            .ok_or_else(|| TrackerError::UnknownArtifact(name.to_string()))
    }
}
