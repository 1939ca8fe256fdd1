//! Remote-backed tracker.
//!
//! [`ObjectStoreTracker`] is the production [`Tracker`]: outputs are uploaded
//! to a [`RemoteObjectStore`], mirrored into the content-addressed [`Cache`],
//! and registered with a [`RunRecorder`]; inputs are resolved, fetched on
//! cache miss, and returned as local paths.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use cadenza_core::remote::RemoteObjectStore;
use cadenza_core::tracker::{
    ArtifactHandle, JobContext, OutputSpec, RunRecorder, Tracker, TrackerError, TrackerFactory,
};
use cadenza_core::types::{Artifact, Bucket, Checksum, VersionedObjectRef};

use crate::cache::Cache;

/// Tracker backed by a remote object store and the local cache.
pub struct ObjectStoreTracker {
    remote: Arc<dyn RemoteObjectStore>,
    cache: Arc<Cache>,
    recorder: Arc<dyn RunRecorder>,
    job: JobContext,
    allow_unversioned: bool,
}

impl ObjectStoreTracker {
    pub fn new(
        remote: Arc<dyn RemoteObjectStore>,
        cache: Arc<Cache>,
        recorder: Arc<dyn RunRecorder>,
        job: JobContext,
    ) -> Self {
        Self {
            remote,
            cache,
            recorder,
            job,
            allow_unversioned: false,
        }
    }

    /// Permit fetching objects that carry no version token. Use caution.
    pub fn with_allow_unversioned(mut self, allow: bool) -> Self {
        self.allow_unversioned = allow;
        self
    }

    /// Upload one local file, reusing an existing version when the cache
    /// proves the same bytes were already stored at the same key.
    async fn store_file(
        &self,
        spec: &OutputSpec,
        local_file: &std::path::Path,
    ) -> Result<VersionedObjectRef, TrackerError> {
        let remote_ref = spec.remote_ref_for(local_file);
        let checksum = Checksum::of_file(local_file)?;

        if let Some(version) = self
            .cache
            .lookup_version(&remote_ref, &checksum)
            .map_err(|e| TrackerError::Cache(e.to_string()))?
        {
            tracing::info!(
                object = %remote_ref,
                version = %version,
                "content unchanged, skipping upload"
            );
            return Ok(remote_ref.with_version(version));
        }

        let bytes = Bytes::from(fs::read(local_file)?);
        let version = self
            .remote
            .put(bytes, &remote_ref)
            .await
            .map_err(|e| TrackerError::Remote(e.to_string()))?;
        tracing::info!(object = %remote_ref, version = %version, "uploaded");

        let versioned = remote_ref.with_version(version);
        let cached_path = self
            .cache
            .path_for(&versioned, true)
            .map_err(|e| TrackerError::Cache(e.to_string()))?;
        fs::copy(local_file, &cached_path)?;
        self.cache
            .finalize(&cached_path, remote_ref, Some(checksum), None)
            .map_err(|e| TrackerError::Cache(e.to_string()))?;
        Ok(versioned)
    }

    /// Materialize one object locally, downloading on cache miss.
    async fn fetch_object(
        &self,
        object: &VersionedObjectRef,
    ) -> Result<PathBuf, TrackerError> {
        if object.version.is_empty() && !self.allow_unversioned {
            return Err(TrackerError::UnversionedFetch(object.to_string()));
        }

        let cached_path = self
            .cache
            .path_for(object, true)
            .map_err(|e| TrackerError::Cache(e.to_string()))?;
        if cached_path.exists() {
            tracing::debug!(object = %object, "cache hit");
            return Ok(cached_path);
        }

        tracing::info!(object = %object, "cache miss, fetching");
        let bare = object.unversioned();
        let version = (!object.version.is_empty()).then_some(object.version.as_str());
        let fetched = self
            .remote
            .get(&bare, version)
            .await
            .map_err(|e| TrackerError::Remote(e.to_string()))?;
        fs::write(&cached_path, &fetched.bytes)?;
        self.cache
            .finalize(
                &cached_path,
                bare,
                Some(Checksum::of_bytes(&fetched.bytes)),
                Some(fetched.last_modified.into()),
            )
            .map_err(|e| TrackerError::Cache(e.to_string()))?;
        Ok(cached_path)
    }
}

#[async_trait]
impl Tracker for ObjectStoreTracker {
    async fn declare_output(&self, spec: OutputSpec) -> Result<Artifact, TrackerError> {
        if spec.local_files.is_empty() {
            return Err(TrackerError::EmptyOutput(spec.name.clone()));
        }

        // Version tokens only exist on versioned buckets.
        self.remote
            .enable_versioning(&Bucket::new(spec.destination.store_id.clone()))
            .await
            .map_err(|e| TrackerError::Remote(e.to_string()))?;

        let mut objects = Vec::with_capacity(spec.local_files.len());
        for local_file in &spec.local_files {
            objects.push(self.store_file(&spec, local_file).await?);
        }

        let artifact = Artifact::new(&spec.name, &spec.artifact_type, objects)?;
        // Caller-supplied metadata wins over the derived debugging block.
        let mut metadata = artifact.recorder_metadata();
        metadata.extend(spec.metadata.clone());
        self.recorder
            .record_output(&self.job, &artifact, &metadata)
            .await?;
        tracing::info!(
            artifact = %spec.name,
            description = %artifact.description(),
            "declared output"
        );
        Ok(artifact)
    }

    async fn declare_input(
        &self,
        artifact: ArtifactHandle,
        use_as: Option<&str>,
    ) -> Result<Vec<PathBuf>, TrackerError> {
        let artifact = match artifact {
            ArtifactHandle::Concrete(artifact) => {
                self.recorder.record_input(&artifact.name, use_as).await?;
                artifact
            }
            ArtifactHandle::Named(name) => {
                self.recorder.record_input(&name, use_as).await?;
                self.recorder.resolve_symbolic(&name).await?
            }
        };

        let mut paths = Vec::with_capacity(artifact.objects.len());
        for object in &artifact.objects {
            paths.push(self.fetch_object(object).await?);
        }
        Ok(paths)
    }

    async fn log_metrics(&self, metrics: BTreeMap<String, Value>) -> Result<(), TrackerError> {
        self.recorder.record_metrics(&self.job, &metrics).await
    }
}

/// Factory handing each graph node its own [`ObjectStoreTracker`].
pub struct ObjectStoreTrackerFactory {
    remote: Arc<dyn RemoteObjectStore>,
    cache: Arc<Cache>,
    recorder: Arc<dyn RunRecorder>,
    allow_unversioned: bool,
}

impl ObjectStoreTrackerFactory {
    pub fn new(
        remote: Arc<dyn RemoteObjectStore>,
        cache: Arc<Cache>,
        recorder: Arc<dyn RunRecorder>,
    ) -> Self {
        Self {
            remote,
            cache,
            recorder,
            allow_unversioned: false,
        }
    }

    pub fn with_allow_unversioned(mut self, allow: bool) -> Self {
        self.allow_unversioned = allow;
        self
    }
}

impl TrackerFactory for ObjectStoreTrackerFactory {
    fn tracker_for(&self, job: JobContext) -> Arc<dyn Tracker> {
        Arc::new(
            ObjectStoreTracker::new(
                Arc::clone(&self.remote),
                Arc::clone(&self.cache),
                Arc::clone(&self.recorder),
                job,
            )
            .with_allow_unversioned(self.allow_unversioned),
        )
    }
}
