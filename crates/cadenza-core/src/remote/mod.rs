//! Remote object store abstraction.
//!
//! This module defines the storage-neutral contract for a versioned blob
//! backend. Implementations live in dedicated crates (for example
//! `cadenza-stores`) while callers depend only on [`RemoteObjectStore`].
//! The content-addressed cache is the only intended client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::types::{Bucket, ObjectRef};

/// Remote store errors.
///
/// Transport failures are fatal for the invoking node; the core performs no
/// automatic retry.
#[derive(Debug, thiserror::Error)]
pub enum RemoteStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// An object body fetched from the remote store.
pub struct FetchedObject {
    pub bytes: Bytes,
    /// Remote-reported modification time, propagated to cached copies.
    pub last_modified: DateTime<Utc>,
}

/// Versioned blob backend contract.
///
/// The store is append-only per version token: once a version exists for a
/// `(ref, content)` pair it is never mutated, so concurrent readers of the
/// same version never race.
#[async_trait]
pub trait RemoteObjectStore: Send + Sync {
    /// Upload object bytes and return the version token the store assigned.
    async fn put(&self, bytes: Bytes, object: &ObjectRef) -> Result<String, RemoteStoreError>;

    /// Download a specific version of an object.
    async fn get(
        &self,
        object: &ObjectRef,
        version: Option<&str>,
    ) -> Result<FetchedObject, RemoteStoreError>;

    /// Return the latest version token for an object.
    async fn latest_version(&self, object: &ObjectRef) -> Result<String, RemoteStoreError>;

    /// Return all version tokens for an object, sorted oldest to newest.
    async fn list_versions(&self, object: &ObjectRef) -> Result<Vec<String>, RemoteStoreError>;

    /// Return all keys under a pseudodirectory prefix, sorted.
    ///
    /// The prefix is treated as a pseudodirectory: only its "children" are
    /// listed, never the marker key itself.
    async fn list_objects(
        &self,
        bucket: &Bucket,
        pseudodirectory: &str,
    ) -> Result<Vec<ObjectRef>, RemoteStoreError>;

    /// Make sure a bucket has object versioning enabled.
    ///
    /// Only needs to run once per bucket.
    async fn enable_versioning(&self, bucket: &Bucket) -> Result<(), RemoteStoreError>;
}
