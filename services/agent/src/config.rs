//! Configuration for the filamentbox agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::secrets::SecretSettings;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory for the encrypted store and key file.
    pub data_dir: PathBuf,

    /// Secret resolution inputs (env var, Vault, key file, default policy).
    pub secrets: SecretSettings,

    /// ChangeWatcher polling interval.
    pub poll_interval: Duration,

    /// Notification history ring capacity.
    pub history_cap: usize,

    /// API bind address.
    pub listen_addr: SocketAddr,

    /// Graceful worker stop timeout.
    pub worker_stop_timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = PathBuf::from(
            std::env::var("FILAMENTBOX_DATA_DIR")
                .unwrap_or_else(|_| "/var/lib/filamentbox".to_string()),
        );

        let secrets = SecretSettings::from_env(&data_dir);

        let poll_interval_ms = std::env::var("FILAMENTBOX_POLL_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2000u64)
            .max(1);

        let history_cap = std::env::var("FILAMENTBOX_HISTORY_CAP")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(fbox_events::DEFAULT_HISTORY_CAP);

        let listen_addr = std::env::var("FILAMENTBOX_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8990".to_string())
            .parse()
            .context("Invalid FILAMENTBOX_LISTEN_ADDR")?;

        let worker_stop_timeout_secs = std::env::var("FILAMENTBOX_WORKER_STOP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10u64);

        let log_level =
            std::env::var("FILAMENTBOX_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            data_dir,
            secrets,
            poll_interval: Duration::from_millis(poll_interval_ms),
            history_cap,
            listen_addr,
            worker_stop_timeout: Duration::from_secs(worker_stop_timeout_secs),
            log_level,
        })
    }

    /// Path of the encrypted config store inside the data directory.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("config.fbox")
    }
}
