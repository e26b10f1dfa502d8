//! Ban lifecycle management.
//!
//! The [`BanManager`] consumes decisions and drives the backend. Per
//! address it keeps at most one active ban: an entry is reserved in the
//! table *before* the backend is called, so two in-flight decisions for
//! the same address can never both reach the backend. Expired
//! reservations are collected lazily when the next decision for that
//! address is checked.
//!
//! State machine per address:
//!
//! ```text
//! Absent -> Reserved (insert) -> Active (backend ack)
//!        -> Expiring (timer fired) -> Absent (backend ack)
//! ```
//!
//! A failed backend ban leaves the address Reserved until natural expiry,
//! which suppresses retry storms; a failed unban leaves it Active past
//! its nominal expiry, logged.

use super::{Backend, WhitelistMatcher};
use crate::config::BackendConfig;
use crate::rules::Decision;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone)]
struct BanEntry {
    expires_at: Instant,
    rule_id: String,
}

/// Consumes decisions and applies bans/unbans via a [`Backend`].
pub struct BanManager {
    backend: Arc<dyn Backend>,
    dry_run: bool,
    whitelist: WhitelistMatcher,
    bans: Arc<Mutex<HashMap<String, BanEntry>>>,
}

impl BanManager {
    /// Create a manager in front of `backend`.
    ///
    /// The whitelist is captured from the configuration at construction
    /// and does not observe hot-reloads; rules do, via the engine.
    pub fn new(backend: Arc<dyn Backend>, config: &BackendConfig) -> Self {
        Self {
            backend,
            dry_run: config.dry_run,
            whitelist: WhitelistMatcher::new(&config.whitelist),
            bans: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Process decisions until the channel closes or the token fires.
    pub async fn run(&self, token: CancellationToken, mut decisions: mpsc::Receiver<Decision>) {
        loop {
            let decision = tokio::select! {
                _ = token.cancelled() => break,
                decision = decisions.recv() => match decision {
                    Some(decision) => decision,
                    None => break,
                },
            };
            if !decision.ban || !decision.violation {
                continue;
            }
            self.handle_decision(&token, decision).await;
        }
        info!(backend = %self.backend.name(), "ban manager shutting down");
    }

    async fn handle_decision(&self, token: &CancellationToken, decision: Decision) {
        if self.whitelist.contains(&decision.ip) {
            info!(
                ip = %decision.ip,
                rule = %decision.rule_id,
                backend = %self.backend.name(),
                "ban skipped (whitelisted ip)"
            );
            return;
        }

        // Check-and-reserve under the lock: the reservation is linearized
        // before any backend call for this address.
        let expires_at = {
            let mut bans = self.lock();
            let now = Instant::now();
            if let Some(existing) = bans.get(&decision.ip) {
                if existing.expires_at > now {
                    info!(
                        ip = %decision.ip,
                        rule = %existing.rule_id,
                        backend = %self.backend.name(),
                        "ban skipped (already active)"
                    );
                    return;
                }
            }
            let expires_at = now + decision.ban_for;
            bans.insert(
                decision.ip.clone(),
                BanEntry {
                    expires_at,
                    rule_id: decision.rule_id.clone(),
                },
            );
            expires_at
        };

        let until = Utc::now()
            + chrono::TimeDelta::from_std(decision.ban_for).unwrap_or(chrono::TimeDelta::MAX);

        if self.dry_run {
            info!(
                ip = %decision.ip,
                rule = %decision.rule_id,
                backend = %self.backend.name(),
                until = %until.to_rfc3339(),
                "DRY-RUN ban"
            );
            return;
        }

        if let Err(e) = self
            .backend
            .ban(
                &decision.ip,
                decision.ban_for,
                &decision.reason,
                &decision.rule_id,
            )
            .await
        {
            // The reservation stays until it naturally expires; no retry.
            error!(
                ip = %decision.ip,
                rule = %decision.rule_id,
                backend = %self.backend.name(),
                error = %e,
                "failed to apply ban"
            );
            return;
        }

        info!(
            ip = %decision.ip,
            rule = %decision.rule_id,
            backend = %self.backend.name(),
            until = %until.to_rfc3339(),
            "ban applied"
        );

        if decision.ban_for > Duration::ZERO {
            self.schedule_unban(token.clone(), decision.ip, expires_at);
        }
    }

    /// Spawn the expiry task: sleep until the ban lapses, then unban.
    /// Cancellation makes the task return without touching the backend.
    fn schedule_unban(&self, token: CancellationToken, ip: String, expires_at: Instant) {
        let backend = Arc::clone(&self.backend);
        let bans = Arc::clone(&self.bans);
        tokio::spawn(async move {
            let mut delay = expires_at.saturating_duration_since(Instant::now());
            if delay.is_zero() {
                delay = Duration::from_secs(1);
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if let Err(e) = backend.unban(&ip).await {
                // Keep the record; future decisions still see it as active
                // until the reservation clock runs out.
                error!(ip = %ip, backend = %backend.name(), error = %e, "failed to unban");
                return;
            }

            bans.lock().unwrap_or_else(|e| e.into_inner()).remove(&ip);
            info!(ip = %ip, backend = %backend.name(), "unbanned");
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BanEntry>> {
        self.bans.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn has_ban(&self, ip: &str) -> bool {
        self.lock().contains_key(ip)
    }
}
