//! filamentbox Agent Library
//!
//! The agent is the control plane of an environmental-monitoring node. It
//! resolves the master encryption key through an ordered set of trust
//! sources, owns the encrypted key/value config store, redistributes config
//! changes to running components without a restart, supervises background
//! worker tasks, and fans operational events out to observers.
//!
//! ## Architecture
//!
//! ```text
//! SecretResolver ──key──► EncryptedStore ◄──set/get── API layer
//!                              │
//!                              ▼ version polling
//!                         ChangeWatcher ──callbacks──► workers, components
//!
//! Orchestrator ──supervises──► Worker tasks (bounded mailboxes)
//!       │                            │
//!       └────────► NotificationBus ◄─┘ ──SSE──► web observers
//! ```
//!
//! ## Modules
//!
//! - `secrets`: master key resolution (env var → Vault → file → default)
//! - `store`: encrypted, versioned config store
//! - `watch`: polling change detection and callback dispatch
//! - `workers`: worker trait, orchestrator, built-in status beacon
//! - `api`: axum delivery surface (workers, config, SSE notifications)

pub mod api;
pub mod config;
pub mod secrets;
pub mod state;
pub mod store;
pub mod watch;
pub mod workers;

// Re-export commonly used types
pub use config::Config;
pub use secrets::{ResolvedKey, SecretResolver, SecretSettings, SecretSource};
pub use state::AppState;
pub use store::{ConfigEntry, ConfigValue, EncryptedStore, StoreError, ValueType};
pub use watch::ChangeWatcher;
pub use workers::{Orchestrator, RestartPolicy, Worker, WorkerContext, WorkerState};
