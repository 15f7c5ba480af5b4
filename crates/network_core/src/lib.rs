use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{CategoryView, ConnectionId, ConnectionStatus, EdgeAction, UserId},
    protocol::{ConnectedProfile, MutualConnectionsResponse, UserSummary},
};
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

pub mod categories;
pub mod error;
pub mod loading;
pub mod mutation;
mod patch;
pub mod remote;
pub mod selector;
pub mod status;

pub use categories::{CategoryLoadState, CategoryStore, LoadOutcome};
pub use error::{ActionKey, SyncError, SyncResult};
pub use loading::{ActionLoadingTracker, LoadingGuard};
pub use mutation::{MutationGateway, MutationOutcome};
pub use patch::MutationId;
pub use remote::{HttpRemoteStore, RemoteStore};
pub use selector::CategorySelector;
pub use status::{Resolution, ResolveReport, StatusResolver};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    CategoryReplaced {
        category: CategoryView,
        len: usize,
    },
    CategoryLoadFailed {
        category: CategoryView,
        error: SyncError,
    },
    StatusChanged {
        user_id: UserId,
        status: ConnectionStatus,
    },
    ActiveCategoryChanged(CategoryView),
    MutationRolledBack {
        mutation_id: MutationId,
        action: EdgeAction,
        error: SyncError,
    },
}

/// Query/command surface the UI layer holds on to.
#[async_trait]
pub trait NetworkHandle: Send + Sync {
    fn current_user(&self) -> &UserId;
    fn get_category(&self, category: &CategoryView) -> Vec<UserSummary>;
    fn category_state(&self, category: &CategoryView) -> CategoryLoadState;
    fn get_status(&self, user_id: &UserId) -> ConnectionStatus;
    fn is_action_loading(&self, key: &ActionKey) -> bool;
    fn active_category(&self) -> CategoryView;
    async fn activate(&self, category: CategoryView) -> SyncResult<ResolveReport>;
    async fn refresh(&self) -> SyncResult<ResolveReport>;
    async fn send_connection_request(
        &self,
        recipient_id: &UserId,
        message: &str,
    ) -> SyncResult<MutationOutcome>;
    async fn accept_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome>;
    async fn decline_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome>;
    async fn remove_connection(&self, connection_id: &ConnectionId)
        -> SyncResult<MutationOutcome>;
    async fn resolve_statuses(&self, user_ids: Vec<UserId>) -> SyncResult<ResolveReport>;
    async fn connection_count(&self, user_id: &UserId) -> SyncResult<u64>;
    async fn mutual_connections(&self, user_id: &UserId) -> SyncResult<MutualConnectionsResponse>;
    async fn connected_profile(&self, user_id: &UserId) -> SyncResult<ConnectedProfile>;
    fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent>;
}

/// Session-scoped owner of every network cache for one signed-in user.
pub struct NetworkClient {
    current_user: UserId,
    remote: Arc<dyn RemoteStore>,
    categories: Arc<CategoryStore>,
    statuses: StatusResolver,
    loading: Arc<ActionLoadingTracker>,
    gateway: MutationGateway,
    selector: CategorySelector,
    events: broadcast::Sender<NetworkEvent>,
}

impl NetworkClient {
    pub fn new(current_user: UserId, remote: Arc<dyn RemoteStore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let categories = Arc::new(CategoryStore::new(
            Arc::clone(&remote),
            current_user.clone(),
            events.clone(),
        ));
        let statuses = StatusResolver::new(Arc::clone(&remote), current_user.clone(), events.clone());
        let loading = Arc::new(ActionLoadingTracker::new());
        let gateway = MutationGateway::new(
            Arc::clone(&remote),
            current_user.clone(),
            Arc::clone(&categories),
            statuses.clone(),
            Arc::clone(&loading),
            events.clone(),
        );
        let selector = CategorySelector::new(Arc::clone(&categories), statuses.clone(), events.clone());
        info!(%current_user, "network: session created");
        Arc::new(Self {
            current_user,
            remote,
            categories,
            statuses,
            loading,
            gateway,
            selector,
            events,
        })
    }

    pub fn over_http(current_user: UserId, base_url: Url) -> Arc<Self> {
        Self::new(current_user, Arc::new(HttpRemoteStore::new(base_url)))
    }

    pub fn categories(&self) -> &CategoryStore {
        &self.categories
    }

    pub fn statuses(&self) -> &StatusResolver {
        &self.statuses
    }

    pub fn loading(&self) -> &ActionLoadingTracker {
        &self.loading
    }

    /// Cached list for `category`. Suggestions never include a user whose
    /// relationship is known to be anything but "none".
    pub fn visible_category(&self, category: &CategoryView) -> Vec<UserSummary> {
        let entries = self.categories.get(category);
        if *category != CategoryView::Suggestions {
            return entries.as_ref().clone();
        }
        entries
            .iter()
            .filter(|summary| {
                matches!(
                    self.statuses.get_status(&summary.user_id),
                    ConnectionStatus::Unknown | ConnectionStatus::None
                )
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NetworkHandle for NetworkClient {
    fn current_user(&self) -> &UserId {
        &self.current_user
    }

    fn get_category(&self, category: &CategoryView) -> Vec<UserSummary> {
        self.visible_category(category)
    }

    fn category_state(&self, category: &CategoryView) -> CategoryLoadState {
        self.categories.load_state(category)
    }

    fn get_status(&self, user_id: &UserId) -> ConnectionStatus {
        self.statuses.get_status(user_id)
    }

    fn is_action_loading(&self, key: &ActionKey) -> bool {
        self.loading.is_loading(key)
    }

    fn active_category(&self) -> CategoryView {
        self.selector.active()
    }

    async fn activate(&self, category: CategoryView) -> SyncResult<ResolveReport> {
        self.selector.activate(category).await
    }

    async fn refresh(&self) -> SyncResult<ResolveReport> {
        self.selector.refresh().await
    }

    async fn send_connection_request(
        &self,
        recipient_id: &UserId,
        message: &str,
    ) -> SyncResult<MutationOutcome> {
        self.gateway
            .send_connection_request(recipient_id, message)
            .await
    }

    async fn accept_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        self.gateway.accept_connection_request(connection_id).await
    }

    async fn decline_connection_request(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        self.gateway.decline_connection_request(connection_id).await
    }

    async fn remove_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> SyncResult<MutationOutcome> {
        self.gateway.remove_connection(connection_id).await
    }

    async fn resolve_statuses(&self, user_ids: Vec<UserId>) -> SyncResult<ResolveReport> {
        self.statuses.resolve_batch(user_ids).await
    }

    async fn connection_count(&self, user_id: &UserId) -> SyncResult<u64> {
        self.remote.connection_count(user_id).await
    }

    async fn mutual_connections(&self, user_id: &UserId) -> SyncResult<MutualConnectionsResponse> {
        let response = self
            .remote
            .mutual_connections(&self.current_user, user_id)
            .await?;
        info!(
            %user_id,
            mutual = response.mutual_connections.len(),
            other = response.other_connections.len(),
            "network: mutual connections fetched"
        );
        Ok(response)
    }

    async fn connected_profile(&self, user_id: &UserId) -> SyncResult<ConnectedProfile> {
        self.remote
            .connected_profile(&self.current_user, user_id)
            .await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
