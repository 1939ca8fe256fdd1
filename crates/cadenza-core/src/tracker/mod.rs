//! Tracker abstraction.
//!
//! A Tracker is the artifact-store handle passed to each running action: it
//! declares consumed inputs (resolve + fetch) and produced outputs
//! (upload + cache + register). Two interchangeable backends exist in
//! `cadenza-stores`: a remote-backed one and a local-only fake for fast
//! iteration. Callers depend only on this trait; the concrete backend is
//! selected by run-mode configuration passed explicitly.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::types::{Artifact, NameError, ObjectRef};

/// Tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("need at least 1 local file to declare an output for {0:?}")]
    EmptyOutput(String),

    #[error("unknown artifact: {0:?}")]
    UnknownArtifact(String),

    #[error(
        "won't fetch an unversioned object ({0}) unless allow_unversioned is set (use caution!)"
    )]
    UnversionedFetch(String),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("run recorder error: {0}")]
    Recorder(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TrackerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Either a concrete artifact or a symbolic name still to be resolved.
#[derive(Debug, Clone)]
pub enum ArtifactHandle {
    Concrete(Artifact),
    Named(String),
}

impl From<Artifact> for ArtifactHandle {
    fn from(value: Artifact) -> Self {
        Self::Concrete(value)
    }
}

impl From<&str> for ArtifactHandle {
    fn from(value: &str) -> Self {
        Self::Named(value.to_string())
    }
}

impl From<String> for ArtifactHandle {
    fn from(value: String) -> Self {
        Self::Named(value)
    }
}

/// Request to declare a produced artifact.
pub struct OutputSpec {
    /// Artifact name (subject to the usual segment constraints).
    pub name: String,
    /// Local files making up the artifact contents.
    pub local_files: Vec<PathBuf>,
    /// Destination pseudodirectory in the remote store.
    pub destination: ObjectRef,
    /// Free-text type tag (e.g. "dataset", "predictions").
    pub artifact_type: String,
    /// Prefix of local paths to drop when computing remote keys.
    pub strip_prefix: Option<PathBuf>,
    /// Extra structured metadata to register with the artifact.
    pub metadata: BTreeMap<String, Value>,
}

impl OutputSpec {
    pub fn new(
        name: impl Into<String>,
        local_files: Vec<PathBuf>,
        destination: ObjectRef,
        artifact_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            local_files,
            destination,
            artifact_type: artifact_type.into(),
            strip_prefix: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Drop `prefix` from local paths when computing remote keys.
    pub fn with_strip_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    /// Attach extra metadata for the run recorder.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Compute the remote key for one local file, honoring `strip_prefix`.
    pub fn remote_ref_for(&self, local_file: &std::path::Path) -> ObjectRef {
        let relative = match &self.strip_prefix {
            Some(prefix) => local_file
                .strip_prefix(prefix)
                .unwrap_or(local_file)
                .to_path_buf(),
            None => local_file.to_path_buf(),
        };
        self.destination.join(relative.to_string_lossy())
    }
}

/// Organization metadata for a single tracked run.
///
/// The hierarchy is `project > job_group > job_type > (individual run)`,
/// plus any number of free-form tags.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub project: String,
    pub job_type: Option<String>,
    pub job_group: Option<String>,
    pub tags: BTreeSet<String>,
    /// Action-specific configuration (hyperparameters, flags).
    pub config: Value,
}

impl JobContext {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_job_group(mut self, job_group: Option<String>) -> Self {
        self.job_group = job_group;
        self
    }

    pub fn with_tags(mut self, tags: BTreeSet<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// A single, logged piece of computation.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Store local files as a new versioned artifact and register it as a
    /// produced output of this run.
    ///
    /// Idempotent under retry: re-declaring byte-identical contents reuses
    /// the existing version instead of uploading again.
    async fn declare_output(&self, spec: OutputSpec) -> Result<Artifact, TrackerError>;

    /// Record a dependency on an existing artifact and fetch local copies.
    ///
    /// Symbolic names are resolved through the run recorder; concrete
    /// artifacts are fetched directly. Returns local paths in object order.
    async fn declare_input(
        &self,
        artifact: ArtifactHandle,
        use_as: Option<&str>,
    ) -> Result<Vec<PathBuf>, TrackerError>;

    /// Record a set of metrics associated with this run.
    async fn log_metrics(&self, metrics: BTreeMap<String, Value>) -> Result<(), TrackerError>;
}

/// External run-metadata collaborator.
///
/// The core calls this interface but does not implement it; `cadenza-stores`
/// ships an in-memory implementation for tests and dev mode.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Register a produced artifact under its fully qualified name.
    async fn record_output(
        &self,
        job: &JobContext,
        artifact: &Artifact,
        metadata: &BTreeMap<String, Value>,
    ) -> Result<(), TrackerError>;

    /// Record that this run consumes `name`.
    async fn record_input(&self, name: &str, use_as: Option<&str>) -> Result<(), TrackerError>;

    /// Record a batch of metrics for this run.
    async fn record_metrics(
        &self,
        job: &JobContext,
        metrics: &BTreeMap<String, Value>,
    ) -> Result<(), TrackerError>;

    /// Resolve a symbolic artifact name to a concrete artifact.
    async fn resolve_symbolic(&self, name: &str) -> Result<Artifact, TrackerError>;
}

/// Builds a fresh tracker handle scoped to one graph node.
pub trait TrackerFactory: Send + Sync {
    fn tracker_for(&self, job: JobContext) -> std::sync::Arc<dyn Tracker>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_output_spec_remote_ref_with_strip_prefix() {
        let spec = OutputSpec::new(
            "results",
            vec![PathBuf::from("/a/b/c/d.txt")],
            ObjectRef::new("bucket", "dest"),
            "dataset",
        )
        .with_strip_prefix("/a/b");
        assert_eq!(
            spec.remote_ref_for(Path::new("/a/b/c/d.txt")),
            ObjectRef::new("bucket", "dest/c/d.txt")
        );
    }

    #[test]
    fn test_output_spec_remote_ref_without_strip_prefix() {
        let spec = OutputSpec::new(
            "results",
            vec![PathBuf::from("out/d.txt")],
            ObjectRef::new("bucket", "dest"),
            "dataset",
        );
        assert_eq!(
            spec.remote_ref_for(Path::new("out/d.txt")),
            ObjectRef::new("bucket", "dest/out/d.txt")
        );
    }

    #[test]
    fn test_artifact_handle_conversions() {
        let named: ArtifactHandle = "proj/artifact:v1".into();
        assert!(matches!(named, ArtifactHandle::Named(_)));
    }
}
