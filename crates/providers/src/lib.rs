//! Provider adapters for third-party generation backends.
//!
//! Every backend is wrapped behind the [`ProviderAdapter`] contract
//! (submit / poll / fetch result / cancel) so the queue runtime never
//! branches on provider protocol details:
//!
//! - [`fal::FalQueueAdapter`]: queue-based image/video provider keyed by a
//!   request id, with generate/edit/upscale variants.
//! - [`minimax::MinimaxAdapter`]: task/file-split video and music provider;
//!   resolves file ids into download URLs before reporting success.
//! - [`runway::RunwayAdapter`]: bearer-token task-polling video provider.
//!
//! Each adapter can run against a [`simulation::Simulator`] instead of the
//! network for deterministic testing.

pub mod adapter;
pub mod backoff;
pub mod config;
pub mod error;
pub mod fal;
mod http;
pub mod minimax;
pub mod registry;
pub mod runway;
pub mod simulation;

pub use adapter::{Phase, PollStatus, ProviderAdapter, ProviderAsset, SubmitReceipt};
pub use backoff::BackoffConfig;
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use registry::{AdapterRegistry, ProviderDescriptor};
pub use simulation::{SimulationProfile, Simulator};
