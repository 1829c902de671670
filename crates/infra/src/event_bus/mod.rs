//! Infrastructure event bus implementations.
//!
//! The bus abstraction and the in-memory bus live in `prodreview-events`. This module
//! provides network-backed implementations (Redis pub/sub).

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};

/// Channel review notifications are published on unless configured otherwise.
pub const DEFAULT_EVENT_CHANNEL: &str = "review_events";
