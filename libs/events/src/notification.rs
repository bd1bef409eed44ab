//! Notification record - the unit delivered to every subscriber.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque key/value metadata attached to a notification.
///
/// A `BTreeMap` keeps serialization order stable for consumers that diff
/// streamed payloads.
pub type Metadata = BTreeMap<String, String>;

/// Severity level for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Success => write!(f, "success"),
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// An operational event published on the bus.
///
/// Immutable once published. The `id` is a process-local monotonic counter
/// assigned by the bus, so subscribers can detect gaps after a lagged
/// delivery queue dropped messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonically increasing id, assigned at publish time.
    pub id: u64,
    /// Severity level.
    pub level: Level,
    /// Human-readable message.
    pub message: String,
    /// Opaque key/value context (component, worker name, config key, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
}
