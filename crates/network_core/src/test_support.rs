use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use shared::{
    domain::{CategoryView, ConnectionId, UserId},
    error::ErrorCode,
    protocol::{
        BatchStatusRequest, BatchStatusResponse, ConnectedProfile, ConnectionInfo, MutualConnectionsResponse,
        SendConnectionRequest, SendConnectionResponse, StatusReport, UserSummary,
    },
};
use tokio::sync::{broadcast, oneshot};

use crate::{
    categories::CategoryStore,
    error::{SyncError, SyncResult},
    loading::ActionLoadingTracker,
    mutation::MutationGateway,
    remote::RemoteStore,
    status::StatusResolver,
    NetworkEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    LoadCategory,
    Send,
    Accept,
    Decline,
    Remove,
    BatchStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    LoadCategory(CategoryView),
    Send { recipient: UserId, message: String },
    Accept(ConnectionId),
    Decline(ConnectionId),
    Remove(ConnectionId),
    BatchStatus(Vec<UserId>),
}

struct Hold {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Handle for a held call: wait for `entered`, then fire `release`.
pub(crate) struct HeldCall {
    pub(crate) entered: oneshot::Receiver<()>,
    pub(crate) release: oneshot::Sender<()>,
}

/// Scripted in-memory remote store. Responses are computed when a call
/// arrives, so a held call answers with the data as it stood on entry.
#[derive(Default)]
pub(crate) struct FakeRemote {
    categories: Mutex<HashMap<CategoryView, Vec<UserSummary>>>,
    statuses: Mutex<HashMap<UserId, StatusReport>>,
    failures: Mutex<HashMap<Op, VecDeque<SyncError>>>,
    holds: Mutex<HashMap<Op, VecDeque<Hold>>>,
    calls: Mutex<Vec<Call>>,
    next_connection: Mutex<u32>,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_category(&self, category: CategoryView, entries: Vec<UserSummary>) {
        self.categories
            .lock()
            .expect("categories")
            .insert(category, entries);
    }

    pub(crate) fn set_status(&self, user_id: &str, report: StatusReport) {
        self.statuses
            .lock()
            .expect("statuses")
            .insert(UserId::from(user_id), report);
    }

    pub(crate) fn fail_next(&self, op: Op, err: SyncError) {
        self.failures
            .lock()
            .expect("failures")
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub(crate) fn hold_next(&self, op: Op) -> HeldCall {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.holds
            .lock()
            .expect("holds")
            .entry(op)
            .or_default()
            .push_back(Hold {
                entered: entered_tx,
                release: release_rx,
            });
        HeldCall {
            entered: entered_rx,
            release: release_tx,
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    pub(crate) fn count(&self, op: Op) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    async fn enter<T>(&self, op: Op, call: Call, respond: impl FnOnce() -> T) -> SyncResult<T> {
        self.calls.lock().expect("calls").push(call);
        let failure = self
            .failures
            .lock()
            .expect("failures")
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        let response = match failure {
            Some(err) => Err(err),
            None => Ok(respond()),
        };
        let hold = self
            .holds
            .lock()
            .expect("holds")
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        if let Some(hold) = hold {
            let _ = hold.entered.send(());
            let _ = hold.release.await;
        }
        response
    }
}

impl Call {
    fn op(&self) -> Op {
        match self {
            Self::LoadCategory(_) => Op::LoadCategory,
            Self::Send { .. } => Op::Send,
            Self::Accept(_) => Op::Accept,
            Self::Decline(_) => Op::Decline,
            Self::Remove(_) => Op::Remove,
            Self::BatchStatus(_) => Op::BatchStatus,
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn load_category(
        &self,
        category: &CategoryView,
        _user_id: &UserId,
    ) -> SyncResult<Vec<UserSummary>> {
        self.enter(Op::LoadCategory, Call::LoadCategory(category.clone()), || {
            self.categories
                .lock()
                .expect("categories")
                .get(category)
                .cloned()
                .unwrap_or_default()
        })
        .await
    }

    async fn send_request(
        &self,
        request: SendConnectionRequest,
    ) -> SyncResult<SendConnectionResponse> {
        let call = Call::Send {
            recipient: request.recipient_id.clone(),
            message: request.message.clone(),
        };
        self.enter(Op::Send, call, || {
            let mut next = self.next_connection.lock().expect("next connection");
            *next += 1;
            SendConnectionResponse {
                connection_id: ConnectionId::new(format!("conn-{next}")),
            }
        })
        .await
    }

    async fn accept_request(
        &self,
        connection_id: &ConnectionId,
        _user_id: &UserId,
    ) -> SyncResult<()> {
        self.enter(Op::Accept, Call::Accept(connection_id.clone()), || ())
            .await
    }

    async fn decline_request(
        &self,
        connection_id: &ConnectionId,
        _user_id: &UserId,
    ) -> SyncResult<()> {
        self.enter(Op::Decline, Call::Decline(connection_id.clone()), || ())
            .await
    }

    async fn remove_connection(
        &self,
        connection_id: &ConnectionId,
        _user_id: &UserId,
    ) -> SyncResult<()> {
        self.enter(Op::Remove, Call::Remove(connection_id.clone()), || ())
            .await
    }

    async fn batch_status(&self, request: BatchStatusRequest) -> SyncResult<BatchStatusResponse> {
        let targets = request.target_user_ids.clone();
        self.enter(Op::BatchStatus, Call::BatchStatus(targets.clone()), || {
            let statuses = self.statuses.lock().expect("statuses");
            BatchStatusResponse {
                statuses: targets
                    .iter()
                    .map(|user_id| {
                        let report = statuses.get(user_id).cloned().unwrap_or_else(StatusReport::none);
                        (user_id.clone(), report)
                    })
                    .collect(),
            }
        })
        .await
    }

    async fn connection_count(&self, _user_id: &UserId) -> SyncResult<u64> {
        Ok(self
            .categories
            .lock()
            .expect("categories")
            .get(&CategoryView::Connections)
            .map_or(0, |entries| entries.len() as u64))
    }

    async fn mutual_connections(
        &self,
        _current_user: &UserId,
        _user_id: &UserId,
    ) -> SyncResult<MutualConnectionsResponse> {
        Ok(MutualConnectionsResponse::default())
    }

    /// Built from the cached connections, so only connected users resolve.
    async fn connected_profile(
        &self,
        _current_user: &UserId,
        user_id: &UserId,
    ) -> SyncResult<ConnectedProfile> {
        let categories = self.categories.lock().expect("categories");
        let summary = categories
            .get(&CategoryView::Connections)
            .and_then(|entries| entries.iter().find(|summary| &summary.user_id == user_id))
            .ok_or_else(|| SyncError::NotFound {
                message: "user is not a connection".to_string(),
            })?;
        Ok(ConnectedProfile {
            user_id: Some(summary.user_id.clone()),
            display_name: summary.display_name.clone(),
            headline: summary.headline.clone(),
            avatar_ref: summary.avatar_ref.clone(),
            connection_info: Some(ConnectionInfo {
                connection_id: summary.connection_id.clone(),
                connection_date: None,
            }),
            ..ConnectedProfile::default()
        })
    }
}

pub(crate) fn me() -> UserId {
    UserId::from("me")
}

pub(crate) fn summary(user_id: &str) -> UserSummary {
    UserSummary::new(user_id, format!("User {user_id}"))
}

pub(crate) fn network_failure() -> SyncError {
    SyncError::Network("connection reset".to_string())
}

pub(crate) fn not_found() -> SyncError {
    SyncError::NotFound {
        message: "connection not found".to_string(),
    }
}

pub(crate) fn conflict() -> SyncError {
    SyncError::ServerRejection {
        status: 409,
        code: ErrorCode::Conflict,
        message: "already connected".to_string(),
    }
}

/// The stores wired the way `NetworkClient` wires them, with the fake kept
/// reachable.
pub(crate) struct Harness {
    pub(crate) remote: Arc<FakeRemote>,
    pub(crate) categories: Arc<CategoryStore>,
    pub(crate) statuses: StatusResolver,
    pub(crate) loading: Arc<ActionLoadingTracker>,
    pub(crate) gateway: Arc<MutationGateway>,
    pub(crate) events: broadcast::Sender<NetworkEvent>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let remote = FakeRemote::new();
        let dyn_remote: Arc<dyn RemoteStore> = remote.clone();
        let (events, _) = broadcast::channel(64);
        let categories = Arc::new(CategoryStore::new(
            Arc::clone(&dyn_remote),
            me(),
            events.clone(),
        ));
        let statuses = StatusResolver::new(Arc::clone(&dyn_remote), me(), events.clone());
        let loading = Arc::new(ActionLoadingTracker::new());
        let gateway = Arc::new(MutationGateway::new(
            dyn_remote,
            me(),
            Arc::clone(&categories),
            statuses.clone(),
            Arc::clone(&loading),
            events.clone(),
        ));
        Self {
            remote,
            categories,
            statuses,
            loading,
            gateway,
            events,
        }
    }

    pub(crate) fn user_ids(&self, category: &CategoryView) -> Vec<String> {
        self.categories
            .get(category)
            .iter()
            .map(|summary| summary.user_id.0.clone())
            .collect()
    }
}
