//! End-to-end tests for the control plane core.
//!
//! These wire the real components together the way `main.rs` does (file-backed
//! store, polling watcher, orchestrator, bus) and verify the cross-component
//! behavior: hot reload without a restart, change forwarding into worker
//! mailboxes, and local-file key resolution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use fbox_events::NotificationBus;

use fbox_agent::secrets::{SecretResolver, SecretSettings, SecretSource};
use fbox_agent::store::{ConfigValue, EncryptedStore};
use fbox_agent::watch::ChangeWatcher;
use fbox_agent::workers::{
    Orchestrator, RestartPolicy, Worker, WorkerCommand, WorkerContext,
};

const POLL: Duration = Duration::from_millis(25);

#[tokio::test]
async fn test_hot_reload_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EncryptedStore::open(dir.path().join("config.fbox"), "key").unwrap());
    let bus = NotificationBus::default();
    let watcher = ChangeWatcher::new(Arc::clone(&store), bus, POLL);

    let (observed_tx, mut observed_rx) = tokio::sync::mpsc::unbounded_channel();
    watcher.on_key("database.type", move |_, value| {
        if let Some(ConfigValue::String(s)) = value {
            observed_tx.send(s.clone()).ok();
        }
        Ok(())
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    store
        .set(
            "database.type",
            ConfigValue::String("prometheus".to_string()),
            None,
        )
        .unwrap();

    // Observed within two polling intervals, with no process restart.
    let observed = tokio::time::timeout(POLL * 2 + Duration::from_millis(50), observed_rx.recv())
        .await
        .expect("change not observed within two polling intervals")
        .unwrap();
    assert_eq!(observed, "prometheus");

    shutdown_tx.send(true).unwrap();
    watcher_task.await.unwrap();
}

/// Worker that records the ConfigChanged commands it receives.
struct RecordingWorker {
    seen: tokio::sync::mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Worker for RecordingWorker {
    async fn run(self: Box<Self>, mut ctx: WorkerContext) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = ctx.shutdown.changed() => {
                    if ctx.is_shutdown() {
                        return Ok(());
                    }
                }
                command = ctx.commands.recv() => {
                    match command {
                        Some(WorkerCommand::ConfigChanged { key }) => {
                            self.seen.send(key).ok();
                        }
                        None => return Ok(()),
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn test_config_change_reaches_worker_mailbox() {
    let store = Arc::new(EncryptedStore::open_in_memory("key"));
    let bus = NotificationBus::default();
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&store), bus.clone()));

    let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
    orchestrator
        .register("sink", RestartPolicy::default(), move || {
            Box::new(RecordingWorker {
                seen: seen_tx.clone(),
            })
        })
        .unwrap();
    orchestrator.start("sink").await.unwrap();

    let watcher = ChangeWatcher::new(Arc::clone(&store), bus, POLL);
    {
        let orchestrator = Arc::clone(&orchestrator);
        watcher.on_key("sink.flush_secs", move |key, _| {
            orchestrator.send_command(
                "sink",
                WorkerCommand::ConfigChanged {
                    key: key.to_string(),
                },
            )?;
            Ok(())
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    store
        .set("sink.flush_secs", ConfigValue::Integer(30), None)
        .unwrap();

    let key = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
        .await
        .expect("worker never saw the config change")
        .unwrap();
    assert_eq!(key, "sink.flush_secs");

    shutdown_tx.send(true).unwrap();
    watcher_task.await.unwrap();
    orchestrator.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_local_file_key_end_to_end() {
    // Vault and the direct env key are absent; a key file with owner-only
    // permissions is present. The resolver must return its contents and the
    // store must open with them.
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("secret.key");
    std::fs::write(&key_path, "node-master-key\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).unwrap();
    }

    let settings = SecretSettings {
        env_key: None,
        vault: None,
        key_file: key_path,
        allow_default: false,
    };
    let bus = NotificationBus::default();
    let resolver = SecretResolver::new(settings, bus.clone());

    let resolved = resolver.resolve().await.unwrap();
    assert_eq!(resolved.source(), SecretSource::LocalFile);
    assert_eq!(resolved.secret(), "node-master-key");

    // No permission warning was published.
    let (history, _) = bus.subscribe();
    assert!(history.is_empty());

    let store_path = dir.path().join("config.fbox");
    let store = EncryptedStore::open(&store_path, resolved.secret()).unwrap();
    store
        .set("sensors.enabled", ConfigValue::Boolean(true), None)
        .unwrap();
    drop(store);

    let reopened = EncryptedStore::open(&store_path, "node-master-key").unwrap();
    assert!(reopened.get_bool("sensors.enabled", false).unwrap());
}

#[tokio::test]
async fn test_callback_failure_surfaces_but_watcher_continues() {
    let store = Arc::new(EncryptedStore::open_in_memory("key"));
    let bus = NotificationBus::default();
    let watcher = ChangeWatcher::new(Arc::clone(&store), bus.clone(), POLL);

    watcher.on_any(|key, _| anyhow::bail!("cannot handle {key}"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(shutdown_rx));

    store.set("a", ConfigValue::Integer(1), None).unwrap();

    // The failure is reported as an error-level notification...
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let (history, _) = bus.subscribe();
            if history
                .iter()
                .any(|n| n.level == fbox_events::Level::Error)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("callback error never surfaced");

    // ...and the loop keeps observing subsequent changes.
    store.set("b", ConfigValue::Integer(2), None).unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let (history, _) = bus.subscribe();
            if history.iter().any(|n| n.message.contains("'b'")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("watcher stopped after a callback failure");

    shutdown_tx.send(true).unwrap();
    watcher_task.await.unwrap();
}
