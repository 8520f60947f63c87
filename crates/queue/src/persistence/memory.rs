use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::snapshot::QueueSnapshot;
use super::store::{PersistenceError, SnapshotStore};

/// In-memory [`SnapshotStore`] that keeps serialized bytes, counts
/// writes and can be told to fail.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slots: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (e.g. to emulate a full disk).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Store raw bytes under `key`, bypassing serialization.
    pub fn put_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(key.to_string(), bytes.into());
    }

    /// Decode whatever is stored under `key`.
    pub fn latest(&self, key: &str) -> Option<QueueSnapshot> {
        let bytes = self.lock().get(key).cloned()?;
        QueueSnapshot::from_bytes(&bytes).ok()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn read(&self, key: &str) -> Result<Option<QueueSnapshot>, PersistenceError> {
        let bytes = self.lock().get(key).cloned();
        bytes.map(|b| QueueSnapshot::from_bytes(&b)).transpose()
    }

    async fn write(&self, key: &str, snapshot: &QueueSnapshot) -> Result<(), PersistenceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Storage("quota exceeded".into()));
        }
        let bytes = snapshot.to_bytes()?;
        self.lock().insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
