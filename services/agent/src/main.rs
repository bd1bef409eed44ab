//! filamentbox Agent
//!
//! Control-plane daemon for an environmental-monitoring node:
//!
//! - **SecretResolver**: resolves the master key (env → Vault → file → default)
//! - **EncryptedStore**: encrypted key/value config store, versioned
//! - **ChangeWatcher**: polls for config changes, dispatches callbacks
//! - **Orchestrator**: supervises background worker tasks
//! - **NotificationBus**: fans operational events out to observers
//!
//! Shutdown proceeds bottom-up: stop accepting worker operations, signal the
//! watcher to exit, stop all workers within a bounded time, and let the
//! store close last.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fbox_events::NotificationBus;

use fbox_agent::api;
use fbox_agent::config::Config;
use fbox_agent::secrets::SecretResolver;
use fbox_agent::state::AppState;
use fbox_agent::store::EncryptedStore;
use fbox_agent::watch::ChangeWatcher;
use fbox_agent::workers::{
    Orchestrator, OrchestratorError, RestartPolicy, StatusBeacon, WorkerCommand,
    BEACON_INTERVAL_KEY,
};

const BEACON_WORKER: &str = "status_beacon";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        data_dir = %config.data_dir.display(),
        listen_addr = %config.listen_addr,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting filamentbox agent"
    );

    let bus = NotificationBus::new(config.history_cap);

    // Resolve the master key; failing every source is fatal at startup.
    let resolver = SecretResolver::new(config.secrets.clone(), bus.clone());
    let resolved = resolver
        .resolve()
        .await
        .context("config key resolution failed")?;
    info!(
        source = %resolved.source(),
        fingerprint = %resolved.fingerprint(),
        "Config key resolved"
    );

    let store = Arc::new(
        EncryptedStore::open(config.store_path(), resolved.secret())
            .context("failed to open encrypted config store")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&store), bus.clone()));
    orchestrator
        .register(BEACON_WORKER, RestartPolicy::default(), || {
            Box::new(StatusBeacon)
        })
        .context("worker registration failed")?;

    let watcher = ChangeWatcher::new(Arc::clone(&store), bus.clone(), config.poll_interval);

    // Hot-reload wiring: forward beacon interval changes into the worker's
    // mailbox. A stopped worker simply misses the nudge; it re-reads the
    // store on its next start.
    {
        let orchestrator = Arc::clone(&orchestrator);
        watcher.on_key(BEACON_INTERVAL_KEY, move |key, _| {
            match orchestrator.send_command(
                BEACON_WORKER,
                WorkerCommand::ConfigChanged {
                    key: key.to_string(),
                },
            ) {
                Ok(()) | Err(OrchestratorError::NotRunning(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher_task = tokio::spawn(watcher.clone().run(shutdown_rx.clone()));

    orchestrator.start_all().await;

    // Delivery surface
    let app_state = AppState::new(
        Arc::clone(&store),
        Arc::clone(&orchestrator),
        bus.clone(),
        config.worker_stop_timeout,
    );
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "API listening");

    let server = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        let router = api::router(app_state);
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");
    bus.info("Agent shutting down");

    // Bottom-up shutdown.
    let _ = shutdown_tx.send(true);

    if let Err(e) = watcher_task.await {
        error!(error = %e, "Change watcher task failed");
    }

    orchestrator.shutdown(config.worker_stop_timeout).await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server error"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    // The store (and with it the key material) drops last.
    drop(store);
    info!("Agent shutdown complete");
    Ok(())
}
