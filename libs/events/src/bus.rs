//! Fan-out notification bus.
//!
//! Delivery model:
//! - `publish` never blocks: the broadcast channel send is synchronous and a
//!   subscriber whose delivery queue is full loses its oldest undelivered
//!   messages (tokio broadcast lag semantics)
//! - each subscriber receives messages in publish order from the moment of
//!   subscription, plus up to the history cap of older messages for context
//! - dropping the receiver is the implicit unsubscribe; the bus keeps no
//!   other per-subscriber state

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::notification::{Level, Metadata, Notification};

/// Default capacity of the shared history ring and per-subscriber queues.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Concurrent-safe publish/subscribe channel for operational events.
///
/// Cloning is cheap; all clones share the same history and subscriber set.
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<Mutex<BusInner>>,
    tx: broadcast::Sender<Notification>,
}

struct BusInner {
    history: VecDeque<Notification>,
    cap: usize,
    next_id: u64,
}

impl NotificationBus {
    /// Create a bus with the given history/queue capacity.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        let (tx, _) = broadcast::channel(cap);
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                history: VecDeque::with_capacity(cap),
                cap,
                next_id: 1,
            })),
            tx,
        }
    }

    /// Publish a notification to all current subscribers.
    ///
    /// Returns the published record (with its assigned id). Never blocks.
    pub fn publish(&self, level: Level, message: impl Into<String>, metadata: Metadata) -> Notification {
        let message = message.into();

        // The lock covers id assignment, history append, and the broadcast
        // send so that a concurrent subscribe() sees either history or the
        // live message, never both or neither.
        let mut inner = self.inner.lock().expect("bus lock poisoned");

        let notification = Notification {
            id: inner.next_id,
            level,
            message,
            metadata,
            timestamp: Utc::now(),
        };
        inner.next_id += 1;

        if inner.history.len() == inner.cap {
            inner.history.pop_front();
        }
        inner.history.push_back(notification.clone());

        // Err means no subscribers are connected, which is fine.
        let _ = self.tx.send(notification.clone());

        trace!(id = notification.id, level = %notification.level, "Published notification");
        notification
    }

    /// Publish with no metadata.
    pub fn info(&self, message: impl Into<String>) -> Notification {
        self.publish(Level::Info, message, Metadata::new())
    }

    /// Publish a success-level notification with no metadata.
    pub fn success(&self, message: impl Into<String>) -> Notification {
        self.publish(Level::Success, message, Metadata::new())
    }

    /// Publish a warning-level notification with no metadata.
    pub fn warning(&self, message: impl Into<String>) -> Notification {
        self.publish(Level::Warning, message, Metadata::new())
    }

    /// Publish an error-level notification with no metadata.
    pub fn error(&self, message: impl Into<String>) -> Notification {
        self.publish(Level::Error, message, Metadata::new())
    }

    /// Subscribe to the bus.
    ///
    /// Returns the retained history (oldest first) plus a live receiver that
    /// yields every notification published after this call.
    pub fn subscribe(&self) -> (Vec<Notification>, broadcast::Receiver<Notification>) {
        let inner = self.inner.lock().expect("bus lock poisoned");
        let history = inner.history.iter().cloned().collect();
        // Subscribing under the lock excludes a concurrent publish, so the
        // receiver starts exactly where the history snapshot ends.
        let rx = self.tx.subscribe();
        (history, rx)
    }

    /// Current number of retained history entries.
    pub fn history_len(&self) -> usize {
        self.inner.lock().expect("bus lock poisoned").history.len()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}
