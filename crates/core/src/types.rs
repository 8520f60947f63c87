/// Job identifiers are random v4 UUIDs, opaque to callers.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
