use std::sync::Arc;

use shared::{
    domain::{
        CategoryView, ConnectionEdge, ConnectionId, ConnectionStatus, EdgeAction, EdgeState,
        InvalidTransition, UserId,
    },
    protocol::SendConnectionRequest,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    categories::CategoryStore,
    error::{ActionKey, SyncError, SyncResult},
    loading::ActionLoadingTracker,
    patch::OptimisticPatch,
    remote::RemoteStore,
    status::StatusResolver,
    NetworkEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// The edge was already in the operation's target state.
    AlreadyApplied,
}

/// Runs the four relationship-changing operations against the remote store
/// and writes their outcome through to the category and status caches.
///
/// Every operation holds its action key for the whole call, applies an
/// optimistic patch before the round trip, then commits it or rolls it back.
pub struct MutationGateway {
    remote: Arc<dyn RemoteStore>,
    current_user: UserId,
    categories: Arc<CategoryStore>,
    statuses: StatusResolver,
    loading: Arc<ActionLoadingTracker>,
    events: broadcast::Sender<NetworkEvent>,
}

impl MutationGateway {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        current_user: UserId,
        categories: Arc<CategoryStore>,
        statuses: StatusResolver,
        loading: Arc<ActionLoadingTracker>,
        events: broadcast::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            remote,
            current_user,
            categories,
            statuses,
            loading,
            events,
        }
    }

    pub async fn send_connection_request(
        &self,
        recipient_id: &UserId,
        message: &str,
    ) -> SyncResult<MutationOutcome> {
        let _guard = self
            .loading
            .try_acquire(ActionKey::User(recipient_id.clone()))?;

        match self.statuses.get_status(recipient_id) {
            ConnectionStatus::PendingSent => {
                info!(%recipient_id, "network: request already sent");
                return Ok(MutationOutcome::AlreadyApplied);
            }
            ConnectionStatus::Unknown | ConnectionStatus::None => {}
            ConnectionStatus::PendingReceived | ConnectionStatus::Connected => {
                let from = self.statuses.edge_for(recipient_id).map(|edge| edge.state);
                EdgeAction::Send.apply(from)?;
            }
        }

        let mut patch = self.patch(EdgeAction::Send);
        patch.push_category(
            self.categories
                .remove_where(&CategoryView::Suggestions, |summary| {
                    &summary.user_id == recipient_id
                }),
        );
        patch.push_status(self.statuses.write(
            recipient_id,
            Some(ConnectionEdge::requested(
                self.current_user.clone(),
                recipient_id.clone(),
            )),
        ));

        let request = SendConnectionRequest {
            requester_id: self.current_user.clone(),
            recipient_id: recipient_id.clone(),
            message: message.to_string(),
        };
        match self.remote.send_request(request).await {
            Ok(response) => {
                if let Some(status_patch) = patch.status_patch() {
                    self.statuses
                        .confirm_connection_id(status_patch, response.connection_id.clone());
                }
                let mutation_id = patch.commit();
                info!(
                    %recipient_id,
                    connection_id = %response.connection_id,
                    %mutation_id,
                    "network: connection request sent"
                );
                Ok(MutationOutcome::Applied)
            }
            Err(err) if err.is_conflict() => {
                let mutation_id = patch.commit();
                info!(
                    %recipient_id,
                    %mutation_id,
                    error = %err,
                    "network: server reports request already exists"
                );
                // The edge predates this call; fetch it for its connection id.
                if let Err(err) = self
                    .statuses
                    .resolve_batch([recipient_id.clone()])
                    .await
                {
                    warn!(%recipient_id, error = %err, "network: status refresh after duplicate send failed");
                }
                Ok(MutationOutcome::AlreadyApplied)
            }
            Err(err) => Err(self.rollback(patch, err)),
        }
    }

    pub async fn accept_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        let _guard = self
            .loading
            .try_acquire(ActionKey::Connection(connection_id.clone()))?;

        let known = self.statuses.find_by_connection(connection_id);
        if let Some(edge) = &known {
            if edge.state == EdgeState::Accepted {
                info!(%connection_id, "network: request already accepted");
                return Ok(MutationOutcome::AlreadyApplied);
            }
        }

        let known_accepted = match &known {
            Some(edge) if edge.requester_id == self.current_user => {
                return Err(InvalidTransition {
                    action: EdgeAction::Accept,
                    from: Some(edge.state),
                }
                .into());
            }
            Some(edge) => edge.apply(EdgeAction::Accept)?,
            None => None,
        };

        let mut patch = self.patch(EdgeAction::Accept);
        patch.push_category(
            self.categories
                .remove_where(&CategoryView::Pending, |summary| {
                    summary.has_connection(connection_id)
                }),
        );
        if let Some(counterpart) = self.counterpart(&patch, known.as_ref(), connection_id) {
            let accepted = known_accepted
                .unwrap_or_else(|| self.accepted_edge(counterpart.clone(), connection_id));
            patch.push_status(self.statuses.write(&counterpart, Some(accepted)));
        }
        let status_written = patch.status_patch().is_some();

        let outcome = match self
            .remote
            .accept_request(connection_id, &self.current_user)
            .await
        {
            Ok(()) => MutationOutcome::Applied,
            Err(err) if err.is_conflict() => {
                info!(%connection_id, error = %err, "network: server reports request already accepted");
                MutationOutcome::AlreadyApplied
            }
            Err(err) => return Err(self.rollback(patch, err)),
        };
        let mutation_id = patch.commit();
        info!(%connection_id, %mutation_id, "network: connection request accepted");

        // The connections view needs the server's summary shape; never synthesize it.
        if let Err(err) = self
            .categories
            .load_category(&CategoryView::Connections)
            .await
        {
            warn!(%connection_id, error = %err, "network: connections reload after accept failed");
        }
        if !status_written {
            match self.categories.find_by_connection(connection_id) {
                Some(summary) => {
                    let accepted = self.accepted_edge(summary.user_id.clone(), connection_id);
                    self.statuses.write(&summary.user_id, Some(accepted));
                }
                None => {
                    warn!(%connection_id, "network: accepted edge not found in any category");
                }
            }
        }
        Ok(outcome)
    }

    /// Rejects a received request or cancels a sent one.
    pub async fn decline_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        let _guard = self
            .loading
            .try_acquire(ActionKey::Connection(connection_id.clone()))?;

        let known = self.statuses.find_by_connection(connection_id);
        if let Some(edge) = &known {
            edge.apply(EdgeAction::Decline)?;
        }

        let mut patch = self.patch(EdgeAction::Decline);
        // The caller may not know which side of the request it holds.
        for category in [CategoryView::Pending, CategoryView::Sent] {
            patch.push_category(
                self.categories
                    .remove_where(&category, |summary| summary.has_connection(connection_id)),
            );
        }
        if let Some(counterpart) = self.counterpart(&patch, known.as_ref(), connection_id) {
            patch.push_status(self.statuses.write(&counterpart, None));
        }

        let result = self
            .remote
            .decline_request(connection_id, &self.current_user)
            .await;
        self.settle(patch, connection_id, result)
    }

    pub async fn remove_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        let _guard = self
            .loading
            .try_acquire(ActionKey::Connection(connection_id.clone()))?;

        let known = self.statuses.find_by_connection(connection_id);
        if let Some(edge) = &known {
            edge.apply(EdgeAction::Remove)?;
        }

        let mut patch = self.patch(EdgeAction::Remove);
        patch.push_category(
            self.categories
                .remove_where(&CategoryView::Connections, |summary| {
                    summary.has_connection(connection_id)
                }),
        );
        if let Some(counterpart) = self.counterpart(&patch, known.as_ref(), connection_id) {
            patch.push_status(self.statuses.write(&counterpart, None));
        }

        let result = self
            .remote
            .remove_connection(connection_id, &self.current_user)
            .await;
        self.settle(patch, connection_id, result)
    }

    /// Commits a patch whose target state is "no edge". A missing edge on the
    /// server means an earlier attempt already got there.
    fn settle(
        &self,
        patch: OptimisticPatch,
        connection_id: &ConnectionId,
        result: SyncResult<()>,
    ) -> SyncResult<MutationOutcome> {
        let outcome = match result {
            Ok(()) => MutationOutcome::Applied,
            Err(err) if err.is_not_found() => {
                info!(%connection_id, action = %patch.action(), "network: edge already gone");
                MutationOutcome::AlreadyApplied
            }
            Err(err) => return Err(self.rollback(patch, err)),
        };
        let mutation_id = patch.commit();
        info!(%connection_id, %mutation_id, ?outcome, "network: edge removed");
        Ok(outcome)
    }

    /// The other user on `connection_id`: taken from a summary the patch just
    /// removed, else from the cached edge.
    fn counterpart(
        &self,
        patch: &OptimisticPatch,
        known: Option<&ConnectionEdge>,
        connection_id: &ConnectionId,
    ) -> Option<UserId> {
        patch
            .removed_summaries()
            .next()
            .map(|summary| summary.user_id.clone())
            .or_else(|| known.map(|edge| edge.counterpart(&self.current_user).clone()))
            .or_else(|| {
                self.categories
                    .find_by_connection(connection_id)
                    .map(|summary| summary.user_id)
            })
    }

    /// Edge after the current user accepted a request from `requester_id`.
    fn accepted_edge(&self, requester_id: UserId, connection_id: &ConnectionId) -> ConnectionEdge {
        ConnectionEdge {
            state: EdgeState::Accepted,
            ..ConnectionEdge::requested(requester_id, self.current_user.clone())
                .with_connection_id(connection_id.clone())
        }
    }

    fn patch(&self, action: EdgeAction) -> OptimisticPatch {
        OptimisticPatch::new(action, Arc::clone(&self.categories), self.statuses.clone())
    }

    fn rollback(&self, patch: OptimisticPatch, err: SyncError) -> SyncError {
        let action = patch.action();
        let mutation_id = patch.rollback();
        warn!(%mutation_id, %action, error = %err, "network: mutation failed; rolled back");
        let _ = self.events.send(NetworkEvent::MutationRolledBack {
            mutation_id,
            action,
            error: err.clone(),
        });
        err
    }
}

#[cfg(test)]
#[path = "tests/mutation_tests.rs"]
mod tests;
