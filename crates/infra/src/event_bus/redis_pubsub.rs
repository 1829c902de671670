//! Redis pub/sub-backed event bus (optional, feature `redis`).
//!
//! Redis pub/sub is not durable: messages published while no subscriber is connected
//! are lost. That matches the best-effort contract of review notifications.

use std::sync::mpsc;
use std::thread;

use redis::Commands;
use thiserror::Error;

use prodreview_events::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),
}

impl From<redis::RedisError> for RedisBusError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis(e.to_string())
    }
}

/// Redis pub/sub bus for plain-text notification lines.
#[derive(Debug, Clone)]
pub struct RedisPubSubEventBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubEventBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl EventBus<String> for RedisPubSubEventBus {
    type Error = RedisBusError;

    fn publish(&self, message: String) -> Result<(), Self::Error> {
        let mut conn = self.client.get_connection()?;
        let receivers: i64 = conn.publish(&self.channel, message)?;
        tracing::debug!(channel = %self.channel, receivers, "published review notification");
        Ok(())
    }

    fn subscribe(&self) -> Subscription<String> {
        let (tx, rx) = mpsc::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Background thread that receives pub/sub messages and forwards them.
        // The subscription disconnects when the thread exits.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "redis subscribe: connection failed");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                tracing::error!(error = %e, %channel, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, %channel, "redis subscription closed");
                        return;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                if tx.send(payload).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
