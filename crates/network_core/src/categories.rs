use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use shared::{
    domain::{CategoryView, ConnectionId, UserId},
    protocol::UserSummary,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    error::{SyncError, SyncResult},
    remote::RemoteStore,
    NetworkEvent,
};

/// What happened to the cache slot when a load finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Replaced { len: usize },
    /// A newer load or a local write landed first; the response was dropped.
    Superseded,
}

/// Read-only view of one category's cache slot for the UI.
#[derive(Debug, Clone, Default)]
pub struct CategoryLoadState {
    pub loaded: bool,
    pub loading: bool,
    pub len: usize,
    pub generation: u64,
    pub last_error: Option<SyncError>,
}

#[derive(Default)]
struct CategorySlot {
    entries: Arc<Vec<UserSummary>>,
    loaded: bool,
    generation: u64,
    latest_issued: u64,
    in_flight: usize,
    last_error: Option<SyncError>,
}

#[derive(Default)]
struct CategoryState {
    next_generation: u64,
    slots: HashMap<CategoryView, CategorySlot>,
}

impl CategoryState {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn slot(&mut self, category: &CategoryView) -> &mut CategorySlot {
        self.slots.entry(category.clone()).or_default()
    }
}

/// Inverse of a local removal from one category.
#[derive(Debug, Clone)]
pub(crate) struct CategoryPatch {
    pub(crate) category: CategoryView,
    pub(crate) removed: Vec<(usize, UserSummary)>,
    pub(crate) generation: u64,
}

pub struct CategoryStore {
    remote: Arc<dyn RemoteStore>,
    current_user: UserId,
    state: RwLock<CategoryState>,
    events: broadcast::Sender<NetworkEvent>,
}

impl CategoryStore {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        current_user: UserId,
        events: broadcast::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            remote,
            current_user,
            state: RwLock::new(CategoryState::default()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CategoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CategoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the cached list. Empty if the category was never loaded.
    pub fn get(&self, category: &CategoryView) -> Arc<Vec<UserSummary>> {
        self.read()
            .slots
            .get(category)
            .map(|slot| Arc::clone(&slot.entries))
            .unwrap_or_default()
    }

    pub fn has_cached(&self, category: &CategoryView) -> bool {
        self.read()
            .slots
            .get(category)
            .is_some_and(|slot| slot.loaded)
    }

    pub fn load_state(&self, category: &CategoryView) -> CategoryLoadState {
        let state = self.read();
        let Some(slot) = state.slots.get(category) else {
            return CategoryLoadState::default();
        };
        CategoryLoadState {
            loaded: slot.loaded,
            loading: slot.in_flight > 0,
            len: slot.entries.len(),
            generation: slot.generation,
            last_error: slot.last_error.clone(),
        }
    }

    /// First cached summary, in any category, that belongs to `connection_id`.
    pub fn find_by_connection(&self, connection_id: &ConnectionId) -> Option<UserSummary> {
        self.read()
            .slots
            .values()
            .flat_map(|slot| slot.entries.iter())
            .find(|summary| summary.has_connection(connection_id))
            .cloned()
    }

    /// Fetches `category` and replaces the cached list wholesale. On failure
    /// the previous list stays readable and the error is kept in the load
    /// state.
    pub async fn load_category(&self, category: &CategoryView) -> SyncResult<LoadOutcome> {
        let generation = {
            let mut state = self.write();
            let generation = state.bump();
            let slot = state.slot(category);
            slot.latest_issued = generation;
            slot.in_flight += 1;
            generation
        };
        let in_flight = InFlightLoad {
            store: self,
            category,
        };

        let result = self
            .remote
            .load_category(category, &self.current_user)
            .await;
        drop(in_flight);

        let mut state = self.write();
        let slot = state.slot(category);
        let superseded = generation < slot.latest_issued || generation < slot.generation;
        match result {
            Ok(_) if superseded => {
                debug!(%category, generation, "network: dropped superseded category response");
                Ok(LoadOutcome::Superseded)
            }
            Ok(entries) => {
                let len = entries.len();
                slot.entries = Arc::new(entries);
                slot.loaded = true;
                slot.generation = generation;
                slot.last_error = None;
                drop(state);
                info!(%category, len, "network: category replaced");
                let _ = self.events.send(NetworkEvent::CategoryReplaced {
                    category: category.clone(),
                    len,
                });
                Ok(LoadOutcome::Replaced { len })
            }
            Err(err) => {
                if !superseded {
                    slot.last_error = Some(err.clone());
                }
                drop(state);
                warn!(%category, error = %err, "network: category load failed; keeping cached list");
                if !superseded {
                    let _ = self.events.send(NetworkEvent::CategoryLoadFailed {
                        category: category.clone(),
                        error: err.clone(),
                    });
                }
                Err(SyncError::CategoryLoad {
                    category: category.clone(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Removes every entry matching `predicate`. Returns `None` when nothing
    /// matched, in which case the slot is untouched.
    pub(crate) fn remove_where<P>(&self, category: &CategoryView, predicate: P) -> Option<CategoryPatch>
    where
        P: Fn(&UserSummary) -> bool,
    {
        let mut state = self.write();
        let generation = state.bump();
        let slot = state.slots.get_mut(category)?;

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(slot.entries.len());
        for (index, summary) in slot.entries.iter().enumerate() {
            if predicate(summary) {
                removed.push((index, summary.clone()));
            } else {
                kept.push(summary.clone());
            }
        }
        if removed.is_empty() {
            return None;
        }

        slot.entries = Arc::new(kept);
        slot.generation = generation;
        let len = slot.entries.len();
        drop(state);

        let _ = self.events.send(NetworkEvent::CategoryReplaced {
            category: category.clone(),
            len,
        });
        Some(CategoryPatch {
            category: category.clone(),
            removed,
            generation,
        })
    }

    /// Puts removed entries back where they were, unless a reload or another
    /// write replaced the slot since the patch was taken. The slot keeps the
    /// patch's generation, so a load issued after the patch still lands.
    pub(crate) fn revert(&self, patch: &CategoryPatch) -> bool {
        let mut state = self.write();
        let Some(slot) = state.slots.get_mut(&patch.category) else {
            return false;
        };
        if slot.generation != patch.generation {
            debug!(
                category = %patch.category,
                "network: skipped category rollback; slot was replaced"
            );
            return false;
        }

        let mut entries = slot.entries.as_ref().clone();
        for (index, summary) in &patch.removed {
            let index = (*index).min(entries.len());
            entries.insert(index, summary.clone());
        }
        let len = entries.len();
        slot.entries = Arc::new(entries);
        drop(state);

        let _ = self.events.send(NetworkEvent::CategoryReplaced {
            category: patch.category.clone(),
            len,
        });
        true
    }
}

/// Keeps the slot's in-flight count honest if the load future is dropped.
struct InFlightLoad<'a> {
    store: &'a CategoryStore,
    category: &'a CategoryView,
}

impl Drop for InFlightLoad<'_> {
    fn drop(&mut self) {
        let mut state = self.store.write();
        let slot = state.slot(self.category);
        slot.in_flight = slot.in_flight.saturating_sub(1);
    }
}

#[cfg(test)]
#[path = "tests/categories_tests.rs"]
mod tests;
