//! In-memory versioned object store.
//!
//! Reference implementation of [`RemoteObjectStore`] backing tests and
//! offline runs. Version tokens are monotonic per object (`v1`, `v2`, ...)
//! and version chains are append-only, matching the contract real backends
//! are held to.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use cadenza_core::remote::{FetchedObject, RemoteObjectStore, RemoteStoreError};
use cadenza_core::types::{Bucket, ObjectRef};

struct StoredVersion {
    token: String,
    bytes: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    // Ordered map so list_objects comes out sorted for free.
    objects: BTreeMap<ObjectRef, Vec<StoredVersion>>,
    versioned_buckets: BTreeMap<String, bool>,
}

/// In-memory [`RemoteObjectStore`].
#[derive(Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions for an object. Test hook.
    pub fn version_count(&self, object: &ObjectRef) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.objects.get(object).map(Vec::len).unwrap_or(0)
    }

    /// Whether versioning was enabled on a bucket. Test hook.
    pub fn versioning_enabled(&self, bucket: &Bucket) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .versioned_buckets
            .get(bucket.as_str())
            .copied()
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteObjectStore for InMemoryObjectStore {
    async fn put(&self, bytes: Bytes, object: &ObjectRef) -> Result<String, RemoteStoreError> {
        let mut state = self.lock();
        let versions = state.objects.entry(object.clone()).or_default();
        let token = format!("v{}", versions.len() + 1);
        tracing::debug!(object = %object, version = %token, "stored object");
        versions.push(StoredVersion {
            token: token.clone(),
            bytes,
            last_modified: Utc::now(),
        });
        Ok(token)
    }

    async fn get(
        &self,
        object: &ObjectRef,
        version: Option<&str>,
    ) -> Result<FetchedObject, RemoteStoreError> {
        let state = self.lock();
        let versions = state
            .objects
            .get(object)
            .ok_or_else(|| RemoteStoreError::NotFound(object.to_string()))?;
        let stored = match version {
            Some(token) => versions
                .iter()
                .find(|v| v.token == token)
                .ok_or_else(|| RemoteStoreError::NotFound(format!("{object}#{token}")))?,
            None => versions
                .last()
                .ok_or_else(|| RemoteStoreError::NotFound(object.to_string()))?,
        };
        Ok(FetchedObject {
            bytes: stored.bytes.clone(),
            last_modified: stored.last_modified,
        })
    }

    async fn latest_version(&self, object: &ObjectRef) -> Result<String, RemoteStoreError> {
        let state = self.lock();
        state
            .objects
            .get(object)
            .and_then(|versions| versions.last())
            .map(|stored| stored.token.clone())
            .ok_or_else(|| RemoteStoreError::NotFound(object.to_string()))
    }

    async fn list_versions(&self, object: &ObjectRef) -> Result<Vec<String>, RemoteStoreError> {
        let state = self.lock();
        let versions = state
            .objects
            .get(object)
            .ok_or_else(|| RemoteStoreError::NotFound(object.to_string()))?;
        Ok(versions.iter().map(|v| v.token.clone()).collect())
    }

    async fn list_objects(
        &self,
        bucket: &Bucket,
        pseudodirectory: &str,
    ) -> Result<Vec<ObjectRef>, RemoteStoreError> {
        let marker = pseudodirectory.trim_matches('/');
        // An empty marker lists the whole bucket.
        let prefix = if marker.is_empty() {
            String::new()
        } else {
            format!("{marker}/")
        };
        let state = self.lock();
        Ok(state
            .objects
            .keys()
            .filter(|object| object.store_id == bucket.as_str())
            .filter(|object| object.key.starts_with(&prefix) && object.key != marker)
            .cloned()
            .collect())
    }

    async fn enable_versioning(&self, bucket: &Bucket) -> Result<(), RemoteStoreError> {
        let mut state = self.lock();
        state
            .versioned_buckets
            .insert(bucket.as_str().to_string(), true);
        Ok(())
    }
}
