//! Local-only tracker for offline development.
//!
//! [`FakeTracker`] never touches a remote store or recorder: outputs land
//! straight in the local cache under the sentinel version [`FAKE_VERSION`],
//! and an `artifact_mapping.json` file next to the cache index remembers
//! which names map to which artifacts across processes. Version pins in
//! input names are ignored, since a fake run only ever sees its own outputs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cadenza_core::tracker::{
    ArtifactHandle, JobContext, OutputSpec, Tracker, TrackerError, TrackerFactory,
};
use cadenza_core::types::{Artifact, ArtifactName, Checksum};

use crate::cache::Cache;

/// Version token assigned to everything a fake run produces.
pub const FAKE_VERSION: &str = "fake";

const MAPPING_FILE: &str = "artifact_mapping.json";

/// [`Tracker`] that simulates the artifact store against the local cache.
pub struct FakeTracker {
    cache: Arc<Cache>,
    job: JobContext,
    mapping_path: PathBuf,
    mapping: Mutex<BTreeMap<String, Artifact>>,
}

impl FakeTracker {
    /// Open a fake tracker over `cache`, loading any persisted name mapping.
    pub fn new(cache: Arc<Cache>, job: JobContext) -> Result<Self, TrackerError> {
        let mapping_path = cache.root().join(MAPPING_FILE);
        let mapping = if mapping_path.exists() {
            let bytes = fs::read(&mapping_path)?;
            serde_json::from_slice(&bytes)
                .map_err(|e| TrackerError::Cache(format!("bad artifact mapping: {e}")))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            cache,
            job,
            mapping_path,
            mapping: Mutex::new(mapping),
        })
    }

    /// Canonical mapping key for a symbolic name: org dropped, project
    /// defaulted, version forced to the fake sentinel.
    fn mapping_key(&self, raw: &str) -> Result<String, TrackerError> {
        let mut parsed = ArtifactName::parse(raw)?;
        parsed.org = None;
        if parsed.project.is_none() {
            parsed.project = Some(self.job.project.clone());
        }
        parsed.version = Some(FAKE_VERSION.to_string());
        Ok(parsed.to_string())
    }

    fn persist_mapping(&self, mapping: &BTreeMap<String, Artifact>) -> Result<(), TrackerError> {
        let jsonified = serde_json::to_vec_pretty(mapping)
            .map_err(|e| TrackerError::Cache(e.to_string()))?;
        let tmp_path = self.mapping_path.with_extension("json.tmp");
        fs::write(&tmp_path, jsonified)?;
        fs::rename(&tmp_path, &self.mapping_path)?;
        Ok(())
    }
}

/// Cached copies are read-only; fake reruns overwrite them in place.
fn make_writable(path: &Path) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    #[allow(clippy::permissions_set_readonly_false)]
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

#[async_trait]
impl Tracker for FakeTracker {
    async fn declare_output(&self, spec: OutputSpec) -> Result<Artifact, TrackerError> {
        if spec.local_files.is_empty() {
            return Err(TrackerError::EmptyOutput(spec.name.clone()));
        }

        let mut objects = Vec::with_capacity(spec.local_files.len());
        for local_file in &spec.local_files {
            let remote_ref = spec.remote_ref_for(local_file);
            let versioned = remote_ref.with_version(FAKE_VERSION);
            let cached_path = self
                .cache
                .path_for(&versioned, true)
                .map_err(|e| TrackerError::Cache(e.to_string()))?;
            if cached_path.exists() {
                make_writable(&cached_path)?;
            }
            fs::copy(local_file, &cached_path)?;
            self.cache
                .finalize(
                    &cached_path,
                    remote_ref,
                    Some(Checksum::of_file(local_file)?),
                    None,
                )
                .map_err(|e| TrackerError::Cache(e.to_string()))?;
            objects.push(versioned);
        }

        let artifact = Artifact::new(&spec.name, &spec.artifact_type, objects)?;
        let key = self.mapping_key(&spec.name)?;
        tracing::info!(artifact = %key, "declared fake output");
        let mut mapping = self.mapping.lock().unwrap_or_else(|e| e.into_inner());
        mapping.insert(key, artifact.clone());
        self.persist_mapping(&mapping)?;
        Ok(artifact)
    }

    async fn declare_input(
        &self,
        artifact: ArtifactHandle,
        use_as: Option<&str>,
    ) -> Result<Vec<PathBuf>, TrackerError> {
        let artifact = match artifact {
            ArtifactHandle::Concrete(artifact) => artifact,
            ArtifactHandle::Named(name) => {
                let key = self.mapping_key(&name)?;
                let mapping = self.mapping.lock().unwrap_or_else(|e| e.into_inner());
                mapping
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| TrackerError::UnknownArtifact(name.clone()))?
            }
        };
        if let Some(use_as) = use_as {
            tracing::debug!(artifact = %artifact.name, use_as = %use_as, "fake input");
        }

        let mut paths = Vec::with_capacity(artifact.objects.len());
        for object in &artifact.objects {
            let cached_path = self
                .cache
                .path_for(object, false)
                .map_err(|e| TrackerError::Cache(e.to_string()))?;
            if !cached_path.exists() {
                return Err(TrackerError::UnknownArtifact(format!(
                    "{} (no cached copy at {})",
                    artifact.name,
                    cached_path.display()
                )));
            }
            paths.push(cached_path);
        }
        Ok(paths)
    }

    async fn log_metrics(&self, metrics: BTreeMap<String, Value>) -> Result<(), TrackerError> {
        for (key, value) in &metrics {
            tracing::info!(metric = %key, value = %value, "fake metric");
        }
        Ok(())
    }
}

/// Factory producing [`FakeTracker`] handles over a shared cache.
pub struct FakeTrackerFactory {
    cache: Arc<Cache>,
}

impl FakeTrackerFactory {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }
}

impl TrackerFactory for FakeTrackerFactory {
    fn tracker_for(&self, job: JobContext) -> Arc<dyn Tracker> {
        // The mapping file is reloaded per node so later nodes see the
        // outputs earlier nodes declared.
        match FakeTracker::new(Arc::clone(&self.cache), job) {
            Ok(tracker) => Arc::new(tracker),
            Err(error) => Arc::new(BrokenTracker {
                error: error.to_string(),
            }),
        }
    }
}

/// Stand-in returned when a fake tracker cannot be opened. Every call fails
/// with the original error so the node reports it instead of panicking.
struct BrokenTracker {
    error: String,
}

#[async_trait]
impl Tracker for BrokenTracker {
    async fn declare_output(&self, _spec: OutputSpec) -> Result<Artifact, TrackerError> {
        Err(TrackerError::Cache(self.error.clone()))
    }

    async fn declare_input(
        &self,
        _artifact: ArtifactHandle,
        _use_as: Option<&str>,
    ) -> Result<Vec<PathBuf>, TrackerError> {
        Err(TrackerError::Cache(self.error.clone()))
    }

    async fn log_metrics(&self, _metrics: BTreeMap<String, Value>) -> Result<(), TrackerError> {
        Err(TrackerError::Cache(self.error.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::types::ObjectRef;
    use tokio_test::block_on;

    fn tracker(cache: &Arc<Cache>) -> FakeTracker {
        FakeTracker::new(
            Arc::clone(cache),
            JobContext::new("demo-project").with_job_type("demo"),
        )
        .unwrap()
    }

    fn spec_for(dir: &Path, name: &str, contents: &[u8]) -> OutputSpec {
        let path = dir.join("data.txt");
        fs::write(&path, contents).unwrap();
        OutputSpec::new(
            name,
            vec![path],
            ObjectRef::new("bucket", "outputs"),
            "dataset",
        )
        .with_strip_prefix(dir)
    }

    #[test]
    fn test_outputs_land_in_cache_with_fake_version() {
        block_on(async {
            let cache_dir = tempfile::tempdir().unwrap();
            let work_dir = tempfile::tempdir().unwrap();
            let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
            let tracker = tracker(&cache);

            let artifact = tracker
                .declare_output(spec_for(work_dir.path(), "results", b"payload"))
                .await
                .unwrap();
            assert_eq!(artifact.primary().version, FAKE_VERSION);

            let paths = tracker
                .declare_input("results".into(), None)
                .await
                .unwrap();
            assert_eq!(fs::read(&paths[0]).unwrap(), b"payload");
        });
    }

    #[test]
    fn test_redeclaring_overwrites_read_only_copy() {
        block_on(async {
            let cache_dir = tempfile::tempdir().unwrap();
            let work_dir = tempfile::tempdir().unwrap();
            let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
            let tracker = tracker(&cache);

            tracker
                .declare_output(spec_for(work_dir.path(), "results", b"first"))
                .await
                .unwrap();
            tracker
                .declare_output(spec_for(work_dir.path(), "results", b"second"))
                .await
                .unwrap();

            let paths = tracker
                .declare_input("results".into(), None)
                .await
                .unwrap();
            assert_eq!(fs::read(&paths[0]).unwrap(), b"second");
        });
    }

    #[test]
    fn test_version_pins_and_org_are_ignored_on_lookup() {
        block_on(async {
            let cache_dir = tempfile::tempdir().unwrap();
            let work_dir = tempfile::tempdir().unwrap();
            let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
            let tracker = tracker(&cache);

            tracker
                .declare_output(spec_for(work_dir.path(), "results", b"payload"))
                .await
                .unwrap();

            // A pinned, fully qualified name still resolves to the fake copy.
            let paths = tracker
                .declare_input("some-org/demo-project/results:v17".into(), None)
                .await
                .unwrap();
            assert_eq!(fs::read(&paths[0]).unwrap(), b"payload");
        });
    }

    #[test]
    fn test_mapping_persists_across_trackers() {
        block_on(async {
            let cache_dir = tempfile::tempdir().unwrap();
            let work_dir = tempfile::tempdir().unwrap();
            let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());

            tracker(&cache)
                .declare_output(spec_for(work_dir.path(), "results", b"payload"))
                .await
                .unwrap();

            // A second tracker over the same cache sees the mapping file.
            let paths = tracker(&cache)
                .declare_input("results".into(), None)
                .await
                .unwrap();
            assert_eq!(fs::read(&paths[0]).unwrap(), b"payload");
        });
    }

    #[test]
    fn test_unknown_artifact() {
        block_on(async {
            let cache_dir = tempfile::tempdir().unwrap();
            let cache = Arc::new(Cache::open(cache_dir.path()).unwrap());
            let tracker = tracker(&cache);
            assert!(matches!(
                tracker.declare_input("never-declared".into(), None).await,
                Err(TrackerError::UnknownArtifact(_))
            ));
        });
    }
}
