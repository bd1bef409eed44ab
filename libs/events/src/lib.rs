//! # fbox-events
//!
//! Notification types and the fan-out bus for the filamentbox node.
//!
//! ## Design Principles
//!
//! - Notifications are immutable once published
//! - Notifications never contain secret values (only source names and metadata)
//! - Publishing never blocks the publisher; slow subscribers lose their
//!   oldest undelivered messages rather than applying backpressure
//! - A bounded history ring gives late subscribers recent context on connect
//!
//! ## Consumers
//!
//! The bus is consumed internally by the core components (secret resolver,
//! change watcher, orchestrator) and externally by the web layer via the
//! agent's streaming endpoint.

mod bus;
mod notification;

pub use bus::{NotificationBus, DEFAULT_HISTORY_CAP};
pub use notification::{Level, Metadata, Notification};
