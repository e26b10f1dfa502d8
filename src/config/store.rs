//! Atomic configuration snapshots.

use super::Config;
use std::sync::{Arc, RwLock};

/// Holds the current configuration and supports atomic swaps.
///
/// Snapshots are immutable once published; `current` hands out a cheap
/// `Arc` clone, so a reader either sees the pre-swap or the post-swap
/// snapshot in full, never a mix.
#[derive(Debug)]
pub struct ConfigStore {
    inner: RwLock<Arc<Config>>,
}

impl ConfigStore {
    /// Create a store with the initial configuration.
    pub fn new(config: Config) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
        }
    }

    /// Return the current snapshot.
    pub fn current(&self) -> Arc<Config> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the current snapshot.
    pub fn update(&self, config: Config) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }
}
