use std::sync::{Arc, PoisonError, RwLock};

use shared::domain::{CategoryView, UserId};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    categories::CategoryStore,
    error::SyncResult,
    status::{ResolveReport, StatusResolver},
    NetworkEvent,
};

/// Tracks the active category and drives the load-then-resolve sequence for
/// it.
pub struct CategorySelector {
    categories: Arc<CategoryStore>,
    statuses: StatusResolver,
    active: RwLock<CategoryView>,
    events: broadcast::Sender<NetworkEvent>,
}

impl CategorySelector {
    pub fn new(
        categories: Arc<CategoryStore>,
        statuses: StatusResolver,
        events: broadcast::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            categories,
            statuses,
            active: RwLock::new(CategoryView::default()),
            events,
        }
    }

    pub fn active(&self) -> CategoryView {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn activate(&self, category: CategoryView) -> SyncResult<ResolveReport> {
        let changed = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *active != category;
            *active = category.clone();
            changed
        };
        if changed {
            info!(%category, "network: category activated");
            let _ = self
                .events
                .send(NetworkEvent::ActiveCategoryChanged(category.clone()));
        }

        if !self.categories.has_cached(&category) {
            self.categories.load_category(&category).await?;
        } else {
            debug!(%category, "network: serving cached category");
        }
        self.resolve_members(&category).await
    }

    /// Reloads the active category even if it is cached. Statuses are
    /// resolved for whatever list is cached afterwards, so a failed reload
    /// still refreshes the stale members before the error is returned.
    pub async fn refresh(&self) -> SyncResult<ResolveReport> {
        let category = self.active();
        let loaded = self.categories.load_category(&category).await;
        let report = self.resolve_members(&category).await?;
        loaded.map(|_| report)
    }

    async fn resolve_members(&self, category: &CategoryView) -> SyncResult<ResolveReport> {
        let members: Vec<UserId> = self
            .categories
            .get(category)
            .iter()
            .map(|summary| summary.user_id.clone())
            .collect();
        self.statuses.resolve_batch(members).await
    }
}

#[cfg(test)]
#[path = "tests/selector_tests.rs"]
mod tests;
