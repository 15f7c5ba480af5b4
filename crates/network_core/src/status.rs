use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use shared::{
    domain::{ConnectionEdge, ConnectionId, ConnectionStatus, UserId},
    protocol::{BatchStatusRequest, BatchStatusResponse},
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{error::SyncResult, remote::RemoteStore, NetworkEvent};

type SharedBatch = Shared<BoxFuture<'static, SyncResult<()>>>;

/// Cached relationship between the current user and one other user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub edge: Option<ConnectionEdge>,
    pub can_connect: bool,
}

impl Resolution {
    pub fn status(&self, current_user: &UserId) -> ConnectionStatus {
        ConnectionStatus::derive(self.edge.as_ref(), current_user)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Ids sent in a new round trip.
    pub requested: usize,
    /// Ids that were already covered by an in-flight batch.
    pub coalesced: usize,
}

/// Inverse of one status write.
#[derive(Debug, Clone)]
pub(crate) struct StatusPatch {
    pub(crate) user_id: UserId,
    pub(crate) previous: Option<Resolution>,
    pub(crate) generation: u64,
}

#[derive(Default)]
struct ResolverState {
    next_generation: u64,
    entries: HashMap<UserId, Resolution>,
    /// Latest generation issued per id, by a batch or by a write.
    issued: HashMap<UserId, u64>,
    in_flight: HashMap<UserId, (u64, SharedBatch)>,
}

impl ResolverState {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct ResolverInner {
    remote: Arc<dyn RemoteStore>,
    current_user: UserId,
    state: Mutex<ResolverState>,
    events: broadcast::Sender<NetworkEvent>,
}

impl ResolverInner {
    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, changes: Vec<(UserId, ConnectionStatus)>) {
        for (user_id, status) in changes {
            let _ = self
                .events
                .send(NetworkEvent::StatusChanged { user_id, status });
        }
    }
}

/// Batch-resolves and caches the relationship status between the current
/// user and other users.
///
/// Batches are coalesced: an id already covered by an in-flight batch is not
/// requested again, the caller waits for that batch instead. Each batch and
/// each local write takes a generation per id, and a batch result is only
/// applied to ids whose latest generation is still that batch's.
#[derive(Clone)]
pub struct StatusResolver {
    inner: Arc<ResolverInner>,
}

impl StatusResolver {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        current_user: UserId,
        events: broadcast::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                remote,
                current_user,
                state: Mutex::new(ResolverState::default()),
                events,
            }),
        }
    }

    pub fn get_status(&self, user_id: &UserId) -> ConnectionStatus {
        self.inner
            .lock()
            .entries
            .get(user_id)
            .map(|resolution| resolution.status(&self.inner.current_user))
            .unwrap_or(ConnectionStatus::Unknown)
    }

    pub fn resolution(&self, user_id: &UserId) -> Option<Resolution> {
        self.inner.lock().entries.get(user_id).cloned()
    }

    pub fn edge_for(&self, user_id: &UserId) -> Option<ConnectionEdge> {
        self.resolution(user_id).and_then(|resolution| resolution.edge)
    }

    pub fn find_by_connection(&self, connection_id: &ConnectionId) -> Option<ConnectionEdge> {
        self.inner
            .lock()
            .entries
            .values()
            .filter_map(|resolution| resolution.edge.as_ref())
            .find(|edge| edge.connection_id.as_ref() == Some(connection_id))
            .cloned()
    }

    pub fn statuses(&self) -> HashMap<UserId, ConnectionStatus> {
        let current_user = &self.inner.current_user;
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(user_id, resolution)| (user_id.clone(), resolution.status(current_user)))
            .collect()
    }

    pub fn is_in_flight(&self, user_id: &UserId) -> bool {
        self.inner.lock().in_flight.contains_key(user_id)
    }

    /// Resolves every id in `user_ids` and returns once each of them has
    /// settled, whether by this call's round trip or by one already in flight.
    pub async fn resolve_batch<I>(&self, user_ids: I) -> SyncResult<ResolveReport>
    where
        I: IntoIterator<Item = UserId>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<UserId> = user_ids
            .into_iter()
            .filter(|user_id| seen.insert(user_id.clone()))
            .collect();
        if ids.is_empty() {
            return Ok(ResolveReport::default());
        }

        let mut report = ResolveReport::default();
        let mut waits: HashMap<u64, SharedBatch> = HashMap::new();
        {
            let mut state = self.inner.lock();
            let mut fetch = Vec::new();
            for user_id in ids {
                match state.in_flight.get(&user_id) {
                    Some((generation, batch)) => {
                        report.coalesced += 1;
                        waits.entry(*generation).or_insert_with(|| batch.clone());
                    }
                    None => fetch.push(user_id),
                }
            }

            if !fetch.is_empty() {
                let generation = state.bump();
                report.requested = fetch.len();
                for user_id in &fetch {
                    state.issued.insert(user_id.clone(), generation);
                }
                let batch = run_batch(Arc::clone(&self.inner), generation, fetch.clone())
                    .boxed()
                    .shared();
                for user_id in fetch {
                    state
                        .in_flight
                        .insert(user_id, (generation, batch.clone()));
                }
                waits.insert(generation, batch);
            }
        }

        debug!(
            requested = report.requested,
            coalesced = report.coalesced,
            "network: resolving statuses"
        );
        for result in join_all(waits.into_values()).await {
            result?;
        }
        Ok(report)
    }

    /// Records a mutation outcome for `user_id`. The write outranks every
    /// batch issued before it.
    pub(crate) fn write(&self, user_id: &UserId, edge: Option<ConnectionEdge>) -> StatusPatch {
        let resolution = Resolution {
            can_connect: edge.is_none(),
            edge,
        };
        let status = resolution.status(&self.inner.current_user);
        let (patch, changed) = {
            let mut state = self.inner.lock();
            let generation = state.bump();
            state.issued.insert(user_id.clone(), generation);
            let previous = state.entries.insert(user_id.clone(), resolution.clone());
            let changed = previous.as_ref() != Some(&resolution);
            (
                StatusPatch {
                    user_id: user_id.clone(),
                    previous,
                    generation,
                },
                changed,
            )
        };
        if changed {
            self.inner.emit(vec![(user_id.clone(), status)]);
        }
        patch
    }

    /// Restores the entry a patch replaced, unless something newer has been
    /// written or issued for that id since.
    pub(crate) fn revert(&self, patch: &StatusPatch) -> bool {
        let status = {
            let mut state = self.inner.lock();
            if state.issued.get(&patch.user_id) != Some(&patch.generation) {
                return false;
            }
            match &patch.previous {
                Some(previous) => {
                    state
                        .entries
                        .insert(patch.user_id.clone(), previous.clone());
                    previous.status(&self.inner.current_user)
                }
                None => {
                    state.entries.remove(&patch.user_id);
                    ConnectionStatus::Unknown
                }
            }
        };
        self.inner.emit(vec![(patch.user_id.clone(), status)]);
        true
    }

    /// Stamps the server-assigned id onto an optimistically written edge.
    pub(crate) fn confirm_connection_id(
        &self,
        patch: &StatusPatch,
        connection_id: ConnectionId,
    ) -> bool {
        let mut state = self.inner.lock();
        if state.issued.get(&patch.user_id) != Some(&patch.generation) {
            return false;
        }
        match state
            .entries
            .get_mut(&patch.user_id)
            .and_then(|resolution| resolution.edge.as_mut())
        {
            Some(edge) => {
                edge.connection_id = Some(connection_id);
                true
            }
            None => false,
        }
    }
}

async fn run_batch(
    inner: Arc<ResolverInner>,
    generation: u64,
    targets: Vec<UserId>,
) -> SyncResult<()> {
    let request = BatchStatusRequest {
        user_id: inner.current_user.clone(),
        target_user_ids: targets.clone(),
    };
    let result = inner.remote.batch_status(request).await;

    let changes = {
        let mut state = inner.lock();
        for user_id in &targets {
            if matches!(state.in_flight.get(user_id), Some((issued, _)) if *issued == generation) {
                state.in_flight.remove(user_id);
            }
        }
        match &result {
            Ok(response) => merge(&mut state, &inner.current_user, generation, &targets, response),
            Err(_) => Vec::new(),
        }
    };

    if !changes.is_empty() {
        info!(changed = changes.len(), "network: statuses updated");
    }
    inner.emit(changes);
    result.map(|_| ())
}

/// Applies one batch response. Ids whose latest generation moved on since the
/// batch was issued are left alone; unchanged entries produce no change.
fn merge(
    state: &mut ResolverState,
    current_user: &UserId,
    generation: u64,
    targets: &[UserId],
    response: &BatchStatusResponse,
) -> Vec<(UserId, ConnectionStatus)> {
    let mut changes = Vec::new();
    let mut stale = 0usize;
    for user_id in targets {
        if state.issued.get(user_id) != Some(&generation) {
            stale += 1;
            continue;
        }
        let Some(report) = response.statuses.get(user_id) else {
            continue;
        };
        let resolution = Resolution {
            edge: report.to_edge(current_user, user_id),
            can_connect: report.can_connect,
        };
        if state.entries.get(user_id) == Some(&resolution) {
            continue;
        }
        let status = resolution.status(current_user);
        state.entries.insert(user_id.clone(), resolution);
        changes.push((user_id.clone(), status));
    }
    if stale > 0 {
        debug!(stale, generation, "network: dropped stale status results");
    }
    changes
}

#[cfg(test)]
#[path = "tests/status_tests.rs"]
mod tests;
