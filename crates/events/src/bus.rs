//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes notifications about **already committed** changes. It is
//! advisory: the store stays the source of truth, and delivery is best-effort
//! at-least-once.
//!
//! - **Transport-agnostic**: in-memory channels, Redis pub/sub, message queues, etc.
//! - **No persistence**: a message that fails to publish is reported, not retried.
//! - **No ordering guarantees across publishers**.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to a message stream.
///
/// Each subscription gets a copy of every message published after it was created
/// (broadcast semantics). Subscriptions are meant for a single consuming thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(message) => tracing::info!(%message, "received"),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything that is already queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic event channel (pub/sub abstraction).
///
/// Publication happens after the store commit and the cache invalidation:
///
/// ```text
/// Write → Store (commit) → Cache (invalidate) → Event Bus (publish) → Consumers
/// ```
///
/// `publish()` is a blocking call (it may go over the network). A failure is surfaced
/// to the caller, but the committed write is never undone because of it.
///
/// Implementations must be `Send + Sync`; multiple threads publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
