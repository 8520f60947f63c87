use async_trait::async_trait;

use super::snapshot::QueueSnapshot;

/// Errors reading or writing snapshots. Never fatal to the queue.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Durable key/value storage for queue snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot under `key`; `Ok(None)` when nothing was stored.
    async fn read(&self, key: &str) -> Result<Option<QueueSnapshot>, PersistenceError>;

    /// Replace the snapshot under `key`.
    async fn write(&self, key: &str, snapshot: &QueueSnapshot) -> Result<(), PersistenceError>;
}
