//! Generation job queue runtime.
//!
//! [`JobQueueManager`] owns every job and is the only place job state
//! changes. The [`StatusPoller`] drives jobs through their providers,
//! the [`ResultMaterializer`] stores finished outputs, and the
//! [`persistence`] layer snapshots the queue so a restarted process can
//! [`Reconciler::reconcile`] what the previous one left behind.

pub mod assets;
pub mod config;
pub mod credits;
pub mod manager;
pub mod materializer;
pub mod persistence;
pub mod poller;
pub mod reconciler;
pub mod retention;

pub use assets::{AssetStore, AssetStoreError, HttpAssetStore, PassthroughAssetStore};
pub use config::{QueueConfig, RecoveryMode};
pub use credits::{CreditLedger, CreditService};
pub use manager::{JobQueueManager, NewJob, Transition};
pub use materializer::ResultMaterializer;
pub use persistence::{
    FileSnapshotStore, MemorySnapshotStore, PersistenceError, Persister, QueueSnapshot,
    SnapshotStore,
};
pub use poller::{PollerConfig, StatusPoller, TickReport};
pub use reconciler::{ReconcileReport, Reconciler};
