//! Worker tasks and their supervision.
//!
//! A worker is a long-lived background task doing domain work (periodic
//! sensing, writing to a data sink). Workers:
//! - Process their mailbox and tick their own loops; no shared mutable state
//! - Communicate with the supervisor only via bounded channels
//! - Stop cooperatively on the shutdown signal
//!
//! The `Orchestrator` owns the registry and the lifecycle operations; see
//! `orchestrator.rs`.

mod beacon;
mod orchestrator;

pub use beacon::{StatusBeacon, INTERVAL_KEY as BEACON_INTERVAL_KEY};
pub use orchestrator::{Orchestrator, OrchestratorError};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use fbox_events::NotificationBus;

use crate::store::EncryptedStore;

/// Commands delivered to a worker's bounded mailbox.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// A configuration key the worker depends on changed.
    ConfigChanged { key: String },
}

/// Context handed to a worker for one run.
pub struct WorkerContext {
    /// Shutdown signal; flips to `true` when the worker should exit.
    pub shutdown: watch::Receiver<bool>,

    /// Bounded command mailbox from the orchestrator.
    pub commands: mpsc::Receiver<WorkerCommand>,

    /// The shared config store.
    pub store: Arc<EncryptedStore>,

    /// The notification bus.
    pub bus: NotificationBus,
}

impl WorkerContext {
    /// Check whether shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A supervised background task.
///
/// `run` is the whole life of one activation: it should loop until the
/// shutdown signal flips, returning `Ok` on a clean exit. An `Err` (or a
/// panic) is a crash and moves the worker to the `Error` state.
#[async_trait]
pub trait Worker: Send + 'static {
    async fn run(self: Box<Self>, ctx: WorkerContext) -> anyhow::Result<()>;
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
    Error,
}

impl WorkerState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Restarting => "restarting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a worker's status.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    /// Current lifecycle state.
    pub state: WorkerState,
    /// When the state was last entered.
    pub since: DateTime<Utc>,
    /// Message of the last crash, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkerStatus {
    fn stopped() -> Self {
        Self {
            state: WorkerState::Stopped,
            since: Utc::now(),
            last_error: None,
        }
    }
}

/// Restart policy for a worker.
///
/// Crashed workers are not restarted unless `restart_on_crash` is set; they
/// stay in `Error` until an operator issues start/restart.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Restart automatically after a crash.
    pub restart_on_crash: bool,
    /// Delay before the automatic restart attempt.
    pub restart_delay: std::time::Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_on_crash: false,
            restart_delay: std::time::Duration::from_secs(1),
        }
    }
}
