//! Job notification bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`QueueEvent`] / [`JobEvent`]: the event envelopes.
//! - [`Subscription`]: handle returned by per-job subscriptions; dropping
//!   it or calling [`Subscription::unsubscribe`] stops delivery.

pub mod bus;
pub mod subscription;

pub use bus::{EventBus, JobEvent, QueueEvent};
pub use subscription::Subscription;
