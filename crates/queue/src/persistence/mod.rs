//! Snapshot persistence for the job queue.
//!
//! The whole queue is written as one versioned [`QueueSnapshot`] through a
//! [`SnapshotStore`]. A single [`Persister`] task owns all writes, so
//! snapshots land in the order their revisions were produced.

mod file;
mod memory;
mod persister;
mod snapshot;
mod store;

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;
pub use persister::Persister;
pub use snapshot::{QueueSnapshot, SCHEMA_VERSION};
pub use store::{PersistenceError, SnapshotStore};

/// Storage key of the queue snapshot.
pub const DEFAULT_SNAPSHOT_KEY: &str = "generation-queue";
