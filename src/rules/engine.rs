//! The rule engine.
//!
//! Consumes events one at a time, records error responses into the
//! sliding-window store, and emits a [`Decision`] for every rule whose
//! threshold is exceeded. Rules are re-read from the config store per
//! event, so hot-reloads take effect without restart.

use super::{Decision, Store};
use crate::config::ConfigStore;
use crate::parser::Event;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Retention horizon when no rules define a window.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// How often the store's GC pass runs.
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Evaluates events against configured rules and emits decisions.
pub struct Engine {
    config: Arc<ConfigStore>,
    store: Store,
}

impl Engine {
    /// Create an engine backed by a [`ConfigStore`].
    ///
    /// The store's retention horizon is the largest rule window in the
    /// startup snapshot; later reloads may change rules but not the
    /// horizon, which only needs to stay an upper bound for GC.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let snapshot = config.current();
        let ttl = snapshot
            .rules
            .iter()
            .map(|r| r.window)
            .max()
            .filter(|w| !w.is_zero())
            .unwrap_or(DEFAULT_TTL);
        let store = Store::new(ttl, GC_INTERVAL);
        Self { config, store }
    }

    /// Consume events and emit decisions until the input channel closes or
    /// the token is cancelled, then release the tracker.
    ///
    /// The decisions sender is dropped when this returns, which closes the
    /// downstream channel.
    pub async fn run(
        self,
        token: CancellationToken,
        mut events: mpsc::Receiver<Event>,
        decisions: mpsc::Sender<Decision>,
    ) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if !self.process_event(event, &decisions).await {
                break;
            }
        }
        self.store.close();
    }

    /// Evaluate one event. Returns false when the decisions channel is
    /// gone and the engine should stop.
    async fn process_event(&self, event: Event, decisions: &mpsc::Sender<Decision>) -> bool {
        let snapshot = self.config.current();
        let eval_time = event.timestamp.unwrap_or_else(Utc::now);

        // 4xx/5xx responses count as errors against the source address.
        if event.status >= 400 {
            // Overflow means the address is untracked; nothing to do.
            let _ = self.store.record_error(&event.remote_addr, eval_time);
        }

        for rule in &snapshot.rules {
            if rule.method != event.method || rule.path != event.path {
                continue;
            }

            let count = self
                .store
                .apply_window(&event.remote_addr, eval_time, rule.window);
            if count >= rule.max_errors as usize {
                let decision = Decision {
                    ip: event.remote_addr.clone(),
                    rule_id: rule.id.clone(),
                    violation: true,
                    reason: "max_errors exceeded".to_string(),
                    ban: true,
                    ban_for: rule.ban_duration,
                    event: event.clone(),
                    timestamp: eval_time,
                };
                info!(
                    ip = %decision.ip,
                    rule = %decision.rule_id,
                    count,
                    "violation detected"
                );
                if decisions.send(decision).await.is_err() {
                    return false;
                }
            }
        }
        true
    }
}
