//! Core type definitions for Cadenza.
//!
//! This module contains the fundamental value types used throughout the
//! system:
//! - Bucket / ObjectRef / VersionedObjectRef: locations in the remote store
//! - Checksum: content hash used for cache dedup
//! - ArtifactName / Artifact / OverrideTable: symbolic artifact identifiers
//!   and their resolution rules

mod artifact;
mod object_ref;

pub use artifact::{
    validate_name_segment, Artifact, ArtifactName, OverrideTable, LATEST_VERSION,
};
pub use object_ref::{Bucket, Checksum, ObjectRef, VersionedObjectRef};

use thiserror::Error;

/// Naming and validation errors.
///
/// These are always raised at construction/parse time and never recovered
/// locally; malformed names surface to the caller immediately.
#[derive(Debug, Error)]
pub enum NameError {
    #[error(
        "invalid {role} name: {value:?} (can only include alphanumeric characters, \
         underscores, dashes, and/or dots)"
    )]
    InvalidField { role: String, value: String },

    #[error("not sure how to parse artifact name: {0:?}")]
    Parse(String),

    #[error("not a valid object URI: {0:?}")]
    ParseUri(String),

    #[error("artifact {0:?} must reference at least one object")]
    EmptyArtifact(String),

    #[error("must join at least one key piece")]
    EmptyJoin,
}
