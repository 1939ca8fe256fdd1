//! Object reference types for the versioned remote store.
//!
//! Terminological note: we use "pseudodirectory" for portions of object keys
//! that look like directories but aren't, since the remote store is not a
//! filesystem. In the key "a/b/c", "c" lives in pseudodirectory "a/b".

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::path::Path;

use super::NameError;

/// Scheme used for object URIs recorded with run metadata.
const URI_SCHEME: &str = "cadenza";

/// A bucket (top-level namespace) in the remote object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bucket(pub String);

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create an [`ObjectRef`] for this bucket with the given key.
    pub fn object(&self, key: impl Into<String>) -> ObjectRef {
        ObjectRef::new(self.0.clone(), key)
    }
}

impl From<&str> for Bucket {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Bucket {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The path to an object in the remote store.
///
/// Immutable value type, totally ordered by `(store_id, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Bucket holding the object.
    pub store_id: String,
    /// Slash-segmented key inside the bucket.
    pub key: String,
}

impl ObjectRef {
    pub fn new(store_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
        }
    }

    /// Join a single piece onto the key, treating the key as a pseudodirectory.
    ///
    /// A leading slash on `piece` is treated as relative ("/x" joins as "x")
    /// and trailing slashes are stripped.
    pub fn join(&self, piece: impl AsRef<str>) -> Self {
        self.join_all([piece.as_ref()])
            .unwrap_or_else(|_| self.clone())
    }

    /// Join multiple pieces onto the key.
    ///
    /// Fails when `pieces` is empty; otherwise equivalent to repeated [`join`].
    pub fn join_all<I, S>(&self, pieces: I) -> Result<Self, NameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut segments: Vec<String> = Vec::new();
        for piece in pieces {
            // Strip a leading slash so "key" / "/sub" yields "key/sub", not "/sub".
            let trimmed = piece
                .as_ref()
                .trim_start_matches('/')
                .trim_end_matches('/');
            if !trimmed.is_empty() {
                segments.push(trimmed.to_string());
            }
        }
        if segments.is_empty() {
            return Err(NameError::EmptyJoin);
        }

        let mut key = self.key.trim_end_matches('/').to_string();
        for segment in segments {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&segment);
        }
        Ok(Self {
            store_id: self.store_id.clone(),
            key,
        })
    }

    /// Attach a version token, producing a [`VersionedObjectRef`].
    pub fn with_version(&self, version: impl Into<String>) -> VersionedObjectRef {
        VersionedObjectRef {
            store_id: self.store_id.clone(),
            key: self.key.clone(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store_id, self.key)
    }
}

/// The path to a specific immutable version of an object in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedObjectRef {
    pub store_id: String,
    pub key: String,
    /// Opaque version token assigned by the remote store.
    pub version: String,
}

impl VersionedObjectRef {
    pub fn new(
        store_id: impl Into<String>,
        key: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            key: key.into(),
            version: version.into(),
        }
    }

    /// Drop the version token.
    pub fn unversioned(&self) -> ObjectRef {
        ObjectRef::new(self.store_id.clone(), self.key.clone())
    }

    /// Render as a `cadenza://store_id/key#version` URI for run recorders.
    pub fn to_uri(&self) -> String {
        format!(
            "{}://{}/{}#{}",
            URI_SCHEME, self.store_id, self.key, self.version
        )
    }

    /// Parse a URI produced by [`to_uri`].
    pub fn from_uri(uri: &str) -> Result<Self, NameError> {
        let bad = || NameError::ParseUri(uri.to_string());
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or_else(bad)?;
        let (location, version) = rest.rsplit_once('#').ok_or_else(bad)?;
        let (store_id, key) = location.split_once('/').ok_or_else(bad)?;
        if store_id.is_empty() || key.is_empty() || version.is_empty() {
            return Err(bad());
        }
        Ok(Self::new(store_id, key, version))
    }
}

impl From<VersionedObjectRef> for ObjectRef {
    fn from(value: VersionedObjectRef) -> Self {
        value.unversioned()
    }
}

impl fmt::Display for VersionedObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.store_id, self.key, self.version)
    }
}

/// SHA-1 content checksum, stored as a lowercase hex digest.
///
/// Used purely for local dedup; this is not a security primitive, and
/// collisions across distinct logical objects are tolerated by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl Checksum {
    /// Compute the checksum of a byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Compute the checksum of a file's contents.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::of_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
