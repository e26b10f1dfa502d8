//! Per-address sliding-window error tracking.
//!
//! [`Store`] keeps a timestamp ring per source address, bounded both in
//! keyspace (`max_ips`) and per-entry length (`max_errors_per_ip`), with a
//! background GC task that drops entries older than the retention horizon.
//!
//! A single mutex guards the whole map and every per-address sequence; it
//! is the serialization point that orders GC against writers. All public
//! operations are linearizable per key.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default maximum number of unique addresses to track.
pub const DEFAULT_MAX_IPS: usize = 100_000;

/// Default maximum errors retained per address.
pub const DEFAULT_MAX_ERRORS_PER_IP: usize = 1_000;

struct Inner {
    by_ip: HashMap<String, Vec<DateTime<Utc>>>,
    ttl: TimeDelta,
    max_ips: usize,
    max_errors_per_ip: usize,
}

/// Tracks per-address error timestamps with TTL GC and hard memory caps.
///
/// The store never fails: hitting the address cap is an expected outcome
/// reported as `None` from [`Store::record_error`], and an address the
/// store refused to track simply never trips a rule.
pub struct Store {
    inner: Arc<Mutex<Inner>>,
    gc_token: CancellationToken,
}

impl Store {
    /// Create a store with the given retention horizon and GC interval.
    ///
    /// Spawns the background GC task; call [`Store::close`] to stop it.
    pub fn new(ttl: Duration, gc_interval: Duration) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            by_ip: HashMap::new(),
            ttl: delta(ttl),
            max_ips: DEFAULT_MAX_IPS,
            max_errors_per_ip: DEFAULT_MAX_ERRORS_PER_IP,
        }));
        let gc_token = CancellationToken::new();

        let gc_inner = Arc::clone(&inner);
        let token = gc_token.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + gc_interval;
            let mut ticker = tokio::time::interval_at(start, gc_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => gc(&gc_inner, Utc::now()),
                }
            }
        });

        Self { inner, gc_token }
    }

    /// Override the memory caps. Values of zero are ignored.
    pub fn set_limits(&self, max_ips: usize, max_errors_per_ip: usize) {
        let mut inner = self.lock();
        if max_ips > 0 {
            inner.max_ips = max_ips;
        }
        if max_errors_per_ip > 0 {
            inner.max_errors_per_ip = max_errors_per_ip;
        }
    }

    /// Stop the background GC task. Idempotent.
    pub fn close(&self) {
        self.gc_token.cancel();
    }

    /// Account one error-like event for `ip` at time `t`.
    ///
    /// Returns the new error count, or `None` when the address cap is
    /// reached and the event was not recorded.
    pub fn record_error(&self, ip: &str, t: DateTime<Utc>) -> Option<usize> {
        let mut inner = self.lock();

        if !inner.by_ip.contains_key(ip) && inner.by_ip.len() >= inner.max_ips {
            // At capacity: refuse new addresses rather than evict live ones.
            return None;
        }

        let cutoff = cutoff(t, inner.ttl);
        let max_errors = inner.max_errors_per_ip;
        let errors = inner.by_ip.entry(ip.to_string()).or_default();
        errors.retain(|ts| *ts > cutoff);

        if errors.len() >= max_errors {
            let excess = errors.len() - max_errors + 1;
            errors.drain(..excess);
        }

        errors.push(t);
        Some(errors.len())
    }

    /// Report the error count for `ip` within `window` of `t`, without
    /// recording anything.
    ///
    /// The trim is persistent: the stored sequence is tightened to the
    /// smallest window it is ever asked about, so when several rules with
    /// different windows match one event the shortest window wins for
    /// subsequent counts.
    pub fn apply_window(&self, ip: &str, t: DateTime<Utc>, window: Duration) -> usize {
        let mut inner = self.lock();
        let Some(errors) = inner.by_ip.get_mut(ip) else {
            return 0;
        };
        let cutoff = cutoff(t, delta(window));
        errors.retain(|ts| *ts > cutoff);
        errors.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn gc_now(&self, now: DateTime<Utc>) {
        gc(&self.inner, now);
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.lock().by_ip.len()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.gc_token.cancel();
    }
}

/// Drop timestamps past the retention horizon; delete entries that end up
/// empty. One O(len) pass per entry, all under the store mutex.
fn gc(inner: &Mutex<Inner>, now: DateTime<Utc>) {
    let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
    let cutoff = cutoff(now, inner.ttl);
    inner.by_ip.retain(|_, errors| {
        errors.retain(|ts| *ts > cutoff);
        !errors.is_empty()
    });
}

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

fn cutoff(t: DateTime<Utc>, horizon: TimeDelta) -> DateTime<Utc> {
    t.checked_sub_signed(horizon)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
