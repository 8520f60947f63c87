use genq_core::{GenerationJob, Timestamp};
use serde::{Deserialize, Serialize};

use super::store::PersistenceError;

/// Current snapshot layout version.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything persisted about the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub schema_version: u32,
    /// Manager revision this snapshot was taken at.
    #[serde(default)]
    pub revision: u64,
    pub written_at: Timestamp,
    /// Jobs in FIFO (enqueue) order.
    pub jobs: Vec<GenerationJob>,
}

impl QueueSnapshot {
    pub fn new(revision: u64, written_at: Timestamp, jobs: Vec<GenerationJob>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision,
            written_at,
            jobs,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistenceError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored snapshot, refusing layouts newer than this build.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PersistenceError> {
        #[derive(Deserialize)]
        struct Header {
            schema_version: u32,
        }

        let header: Header = serde_json::from_slice(bytes)?;
        if header.schema_version > SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedSchema {
                found: header.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
