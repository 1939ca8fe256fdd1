//! Storage backends for cadenza.
//!
//! This crate supplies the concrete pieces the core only defines contracts
//! for: the content-addressed local [`cache`], an in-memory versioned object
//! store, the remote-backed and fake trackers, and an in-memory run recorder.

pub mod cache;
pub mod fake_tracker;
pub mod memory_remote;
pub mod object_tracker;
pub mod recorder;

pub use cache::{Cache, CacheEntry, CacheError};
pub use fake_tracker::{FakeTracker, FakeTrackerFactory, FAKE_VERSION};
pub use memory_remote::InMemoryObjectStore;
pub use object_tracker::{ObjectStoreTracker, ObjectStoreTrackerFactory};
pub use recorder::InMemoryRunRecorder;
