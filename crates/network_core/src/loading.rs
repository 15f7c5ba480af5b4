use std::{
    collections::HashSet,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use crate::error::{ActionKey, SyncError, SyncResult};

/// Per-key in-flight flags that keep two mutations on the same entity from
/// running at once.
#[derive(Debug, Default)]
pub struct ActionLoadingTracker {
    active: Mutex<HashSet<ActionKey>>,
}

impl ActionLoadingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<ActionKey>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_loading(&self, key: &ActionKey) -> bool {
        self.active().contains(key)
    }

    pub fn active_keys(&self) -> Vec<ActionKey> {
        self.active().iter().cloned().collect()
    }

    /// Sets the flag for `key`. The flag is cleared when the guard drops,
    /// which covers early returns, panics and cancelled futures alike.
    pub fn try_acquire(&self, key: ActionKey) -> SyncResult<LoadingGuard<'_>> {
        if !self.active().insert(key.clone()) {
            debug!(%key, "network: rejected concurrent action");
            return Err(SyncError::ConcurrentAction { key });
        }
        debug!(%key, "network: action started");
        Ok(LoadingGuard { tracker: self, key })
    }

    /// Runs `action` with the flag for `key` held and returns its outcome
    /// unchanged.
    pub async fn with_loading<F, T>(&self, key: ActionKey, action: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let _guard = self.try_acquire(key)?;
        action.await
    }
}

#[must_use = "the loading flag is released as soon as the guard is dropped"]
pub struct LoadingGuard<'a> {
    tracker: &'a ActionLoadingTracker,
    key: ActionKey,
}

impl LoadingGuard<'_> {
    pub fn key(&self) -> &ActionKey {
        &self.key
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.tracker.active().remove(&self.key);
        debug!(key = %self.key, "network: action finished");
    }
}

#[cfg(test)]
#[path = "tests/loading_tests.rs"]
mod tests;
