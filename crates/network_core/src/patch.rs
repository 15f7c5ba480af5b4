use std::{fmt, sync::Arc};

use shared::{domain::EdgeAction, protocol::UserSummary};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    categories::{CategoryPatch, CategoryStore},
    status::{StatusPatch, StatusResolver},
};

/// Tag of one optimistic mutation, from local apply to commit or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PatchOp {
    Category(CategoryPatch),
    Status(StatusPatch),
}

/// Local cache edits applied ahead of server confirmation, kept together with
/// their inverses.
///
/// A patch that is dropped without being committed rolls itself back, so a
/// cancelled mutation leaves the caches as they were.
pub(crate) struct OptimisticPatch {
    id: MutationId,
    action: EdgeAction,
    ops: Vec<PatchOp>,
    categories: Arc<CategoryStore>,
    statuses: StatusResolver,
}

impl OptimisticPatch {
    pub(crate) fn new(
        action: EdgeAction,
        categories: Arc<CategoryStore>,
        statuses: StatusResolver,
    ) -> Self {
        Self {
            id: MutationId::new(),
            action,
            ops: Vec::new(),
            categories,
            statuses,
        }
    }

    pub(crate) fn action(&self) -> EdgeAction {
        self.action
    }

    pub(crate) fn push_category(&mut self, patch: Option<CategoryPatch>) {
        if let Some(patch) = patch {
            self.ops.push(PatchOp::Category(patch));
        }
    }

    pub(crate) fn push_status(&mut self, patch: StatusPatch) {
        self.ops.push(PatchOp::Status(patch));
    }

    pub(crate) fn status_patch(&self) -> Option<&StatusPatch> {
        self.ops.iter().find_map(|op| match op {
            PatchOp::Status(patch) => Some(patch),
            PatchOp::Category(_) => None,
        })
    }

    pub(crate) fn removed_summaries(&self) -> impl Iterator<Item = &UserSummary> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                PatchOp::Category(patch) => Some(patch),
                PatchOp::Status(_) => None,
            })
            .flat_map(|patch| patch.removed.iter().map(|(_, summary)| summary))
    }

    pub(crate) fn commit(mut self) -> MutationId {
        let ops = std::mem::take(&mut self.ops);
        debug!(mutation_id = %self.id, action = %self.action, ops = ops.len(), "network: patch committed");
        self.id
    }

    /// Undoes every op, newest first. Ops whose target moved on since are
    /// skipped by the stores themselves.
    pub(crate) fn rollback(mut self) -> MutationId {
        self.undo("network: patch rolled back");
        self.id
    }

    fn undo(&mut self, message: &'static str) {
        let ops = std::mem::take(&mut self.ops);
        let mut reverted = 0usize;
        for op in ops.iter().rev() {
            let applied = match op {
                PatchOp::Category(patch) => self.categories.revert(patch),
                PatchOp::Status(patch) => self.statuses.revert(patch),
            };
            if applied {
                reverted += 1;
            }
        }
        debug!(
            mutation_id = %self.id,
            action = %self.action,
            reverted,
            ops = ops.len(),
            "{message}"
        );
    }
}

impl Drop for OptimisticPatch {
    fn drop(&mut self) {
        if self.ops.is_empty() {
            return;
        }
        warn!(mutation_id = %self.id, action = %self.action, "network: mutation abandoned before it settled");
        self.undo("network: abandoned patch rolled back");
    }
}
