//! Configuration change detection and callback dispatch.
//!
//! A single background loop polls the store's version counter at a fixed
//! interval. On a version increase it diffs the previous and current value
//! snapshots, so only keys that actually changed (added, removed, or new
//! value) trigger callbacks. Per-key callbacks run before wildcard
//! callbacks for each changed key; no ordering is guaranteed between
//! changed keys or between callbacks registered for the same key.
//!
//! Callback failures are isolated: an `Err` is published as an error-level
//! notification and never prevents other callbacks from running. The stop
//! signal lets the loop finish its in-flight diff pass, then exit - no
//! callback is interrupted mid-execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use fbox_events::{Level, Metadata, NotificationBus};

use crate::store::{ConfigValue, EncryptedStore};

/// A change callback. Receives the key and the new value (`None` when the
/// key was deleted). Callbacks should be time-bounded; a stuck callback
/// delays detection of subsequent changes.
pub type ChangeCallback =
    Arc<dyn Fn(&str, Option<&ConfigValue>) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_key: HashMap<String, Vec<ChangeCallback>>,
    wildcard: Vec<ChangeCallback>,
}

/// Polls the store for version changes and dispatches registered callbacks.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone)]
pub struct ChangeWatcher {
    store: Arc<EncryptedStore>,
    bus: NotificationBus,
    interval: Duration,
    registry: Arc<Mutex<Registry>>,
    /// Snapshot taken at construction; every write after `new` is diffed.
    baseline: (u64, HashMap<String, ConfigValue>),
}

impl ChangeWatcher {
    /// Create a watcher over the given store.
    ///
    /// The diff baseline is the store state at this call, so a write landing
    /// before the polling loop is spawned is still observed.
    pub fn new(store: Arc<EncryptedStore>, bus: NotificationBus, interval: Duration) -> Self {
        // tokio's interval panics on a zero period.
        let interval = interval.max(Duration::from_millis(1));
        let baseline = store.snapshot();
        Self {
            store,
            bus,
            interval,
            registry: Arc::new(Mutex::new(Registry::default())),
            baseline,
        }
    }

    /// Register a callback for a single key.
    pub fn on_key<F>(&self, key: &str, callback: F)
    where
        F: Fn(&str, Option<&ConfigValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().expect("watcher lock poisoned");
        registry
            .by_key
            .entry(key.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Register a wildcard callback, invoked for every changed key.
    pub fn on_any<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&ConfigValue>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().expect("watcher lock poisoned");
        registry.wildcard.push(Arc::new(callback));
    }

    /// Run the polling loop until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting change watcher"
        );

        let (mut last_version, mut last_values) = self.baseline.clone();
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Change watcher shutting down");
                        break;
                    }
                }

                _ = interval.tick() => {
                    let (version, values) = self.store.snapshot();
                    if version == last_version {
                        continue;
                    }

                    debug!(
                        from = last_version,
                        to = version,
                        "Store version changed, diffing"
                    );
                    let changed = diff_values(&last_values, &values);
                    self.dispatch(&changed);

                    last_version = version;
                    last_values = values;
                }
            }
        }
    }

    /// Invoke callbacks for a batch of changed keys.
    fn dispatch(&self, changed: &[(String, Option<ConfigValue>)]) {
        for (key, value) in changed {
            // Snapshot the callback list outside the lock so registration
            // from inside a callback cannot deadlock.
            let callbacks: Vec<ChangeCallback> = {
                let registry = self.registry.lock().expect("watcher lock poisoned");
                registry
                    .by_key
                    .get(key)
                    .into_iter()
                    .flatten()
                    .chain(registry.wildcard.iter())
                    .cloned()
                    .collect()
            };

            for callback in callbacks {
                if let Err(e) = callback(key, value.as_ref()) {
                    error!(key, error = %e, "Config change callback failed");
                    let mut metadata = Metadata::new();
                    metadata.insert("key".to_string(), key.clone());
                    self.bus.publish(
                        Level::Error,
                        format!("Config change callback for '{key}' failed: {e}"),
                        metadata,
                    );
                }
            }
        }
    }
}

/// Keys whose value differs between two snapshots, with the new value
/// (`None` for deletions). Order is unspecified.
fn diff_values(
    prev: &HashMap<String, ConfigValue>,
    curr: &HashMap<String, ConfigValue>,
) -> Vec<(String, Option<ConfigValue>)> {
    let mut changed = Vec::new();

    for (key, value) in curr {
        if prev.get(key) != Some(value) {
            changed.push((key.clone(), Some(value.clone())));
        }
    }
    for key in prev.keys() {
        if !curr.contains_key(key) {
            changed.push((key.clone(), None));
        }
    }

    changed
}
