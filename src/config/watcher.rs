//! Configuration file watching and hot-reload.
//!
//! Watches the config path for modification events, debounces rapid
//! successive events, and publishes a fresh snapshot into the
//! [`ConfigStore`] on every successful parse + validate. On failure the
//! previous snapshot stays in force.

use super::{Config, ConfigStore};
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Events arriving within this window of the previous handled event are
/// ignored, so editors that write in several bursts trigger one reload.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// A running config-file watcher.
///
/// The watcher is stopped explicitly with [`ConfigWatcher::stop`] rather
/// than through the shutdown token; reloads stay possible until the
/// orchestrator decides otherwise.
pub struct ConfigWatcher {
    watcher: notify::RecommendedWatcher,
    handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching `path`, reloading into `store` on change.
    pub fn spawn(path: PathBuf, store: Arc<ConfigStore>) -> Result<Self, notify::Error> {
        let (tx, mut rx) = mpsc::channel::<notify::Event>(16);

        // notify delivers events on its own thread; forward the relevant
        // ones into the async reload task.
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event)
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) =>
                    {
                        let _ = tx.blocking_send(event);
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "config watcher error"),
                }
            })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        let handle = tokio::spawn(async move {
            let mut last_handled: Option<Instant> = None;
            while let Some(_event) = rx.recv().await {
                let now = Instant::now();
                if last_handled.is_some_and(|t| now.duration_since(t) < DEBOUNCE) {
                    continue;
                }
                last_handled = Some(now);

                info!(path = %path.display(), "config file change detected");
                match Config::load(&path) {
                    Ok(config) => {
                        store.update(config);
                        info!("config reloaded successfully");
                    }
                    Err(e) => {
                        error!(error = %e, "failed to reload config, keeping previous snapshot");
                    }
                }
            }
        });

        Ok(Self { watcher, handle })
    }

    /// Stop the watcher and wait for the reload task to drain.
    pub async fn stop(self) {
        // Dropping the notify watcher drops the channel sender, which ends
        // the reload task.
        drop(self.watcher);
        let _ = self.handle.await;
    }
}
