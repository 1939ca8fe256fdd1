//! # Cadenza Core
//!
//! Core abstractions and deterministic logic for the Cadenza pipeline
//! orchestrator.
//!
//! This crate contains:
//! - ObjectRef / VersionedObjectRef / Checksum / Artifact value types
//! - ArtifactName parsing, matching, and override resolution
//! - the Action trait and graph construction
//! - the DAG runner with skip/filter semantics
//! - the Tracker and RemoteObjectStore capability traits
//!
//! This crate does NOT contain:
//! - concrete store backends (see `cadenza-stores`)
//! - configuration loading (see `cadenza-config`)

pub mod action;
pub mod graph;
pub mod remote;
pub mod runner;
pub mod tracker;
pub mod types;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::action::{resolved_io, Action, ActionError, ResolvedIo};
    pub use crate::graph::{ActionGraph, GraphBuilder, GraphError, GraphNode};
    pub use crate::remote::{FetchedObject, RemoteObjectStore, RemoteStoreError};
    pub use crate::runner::{NodeState, RunOptions, RunOutcome, RunReport, Runner};
    pub use crate::tracker::{
        ArtifactHandle, JobContext, OutputSpec, RunRecorder, Tracker, TrackerError,
        TrackerFactory,
    };
    pub use crate::types::{
        Artifact, ArtifactName, Bucket, Checksum, NameError, ObjectRef, OverrideTable,
        VersionedObjectRef, LATEST_VERSION,
    };
}

// Re-export key types at crate root
pub use action::{Action, ActionError};
pub use graph::{ActionGraph, GraphBuilder, GraphError};
pub use runner::{RunOptions, RunOutcome, Runner};
pub use tracker::{Tracker, TrackerError, TrackerFactory};
pub use types::{Artifact, ArtifactName, Checksum, ObjectRef, VersionedObjectRef};

// Re-export CancellationToken for convenience
pub use tokio_util::sync::CancellationToken;
