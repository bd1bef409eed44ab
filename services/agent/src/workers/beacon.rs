//! Built-in status beacon worker.
//!
//! Publishes a periodic node-status notification (config version, worker
//! uptime) so observers see a heartbeat even when no sensor worker is
//! installed. The beacon interval lives in the config store under
//! `beacon.interval_secs` and is hot-reloaded via its command mailbox.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fbox_events::{Level, Metadata};

use super::{Worker, WorkerCommand, WorkerContext};

/// Config key holding the beacon interval in seconds.
pub const INTERVAL_KEY: &str = "beacon.interval_secs";

const DEFAULT_INTERVAL_SECS: i64 = 60;

/// Periodic status notification worker.
pub struct StatusBeacon;

impl StatusBeacon {
    fn read_interval(ctx: &WorkerContext) -> Duration {
        let secs = match ctx.store.get_i64(INTERVAL_KEY, DEFAULT_INTERVAL_SECS) {
            Ok(secs) if secs > 0 => secs,
            Ok(secs) => {
                warn!(secs, "Ignoring non-positive beacon interval");
                DEFAULT_INTERVAL_SECS
            }
            Err(e) => {
                warn!(error = %e, "Beacon interval has wrong type, using default");
                DEFAULT_INTERVAL_SECS
            }
        };
        Duration::from_secs(secs as u64)
    }
}

#[async_trait]
impl Worker for StatusBeacon {
    async fn run(self: Box<Self>, mut ctx: WorkerContext) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut interval = tokio::time::interval(Self::read_interval(&ctx));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = ctx.shutdown.changed() => {
                    if ctx.is_shutdown() {
                        info!("Status beacon shutting down");
                        return Ok(());
                    }
                }

                command = ctx.commands.recv() => {
                    match command {
                        Some(WorkerCommand::ConfigChanged { key }) if key == INTERVAL_KEY => {
                            let next = Self::read_interval(&ctx);
                            debug!(interval_secs = next.as_secs(), "Beacon interval updated");
                            interval = tokio::time::interval(next);
                            interval.set_missed_tick_behavior(
                                tokio::time::MissedTickBehavior::Skip,
                            );
                        }
                        Some(_) => {}
                        None => {
                            // Mailbox closed: supervisor is gone.
                            return Ok(());
                        }
                    }
                }

                _ = interval.tick() => {
                    let mut metadata = Metadata::new();
                    metadata.insert(
                        "uptime_secs".to_string(),
                        started.elapsed().as_secs().to_string(),
                    );
                    metadata.insert(
                        "config_version".to_string(),
                        ctx.store.version().to_string(),
                    );
                    ctx.bus.publish(Level::Info, "Node status", metadata);
                }
            }
        }
    }
}
