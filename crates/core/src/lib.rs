//! Domain types and pure logic for the generation job queue.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! provider adapters, the queue runtime and any tooling built on top.

pub mod config;
pub mod error;
pub mod filter;
pub mod job;
pub mod status;
pub mod types;
pub mod validation;

pub use config::ConfigError;
pub use error::CoreError;
pub use filter::JobFilter;
pub use job::{GenerationJob, JobError, JobErrorKind, JobType, Metadata, ProviderKind, ResultAsset};
pub use status::JobStatus;
pub use types::{JobId, Timestamp};
