//! Review change notifications and the channel they travel on.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::{ReviewAction, ReviewNotification};
