use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CategoryView, ConnectionId, UserId},
    error::{ErrorCode, RejectionBody},
    protocol::{
        AckResponse, BatchStatusRequest, BatchStatusResponse, ConnectedProfile,
        ConnectedProfileResponse, ConnectionActionRequest, ConnectionCountResponse,
        MutualConnectionsResponse, SendConnectionRequest, SendConnectionResponse, UserSummary,
    },
};
use tracing::debug;
use url::Url;

use crate::error::{SyncError, SyncResult};

/// Server-facing surface of the synchronizer.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn load_category(
        &self,
        category: &CategoryView,
        user_id: &UserId,
    ) -> SyncResult<Vec<UserSummary>>;
    async fn send_request(
        &self,
        request: SendConnectionRequest,
    ) -> SyncResult<SendConnectionResponse>;
    async fn accept_request(&self, connection_id: &ConnectionId, user_id: &UserId)
        -> SyncResult<()>;
    async fn decline_request(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
    ) -> SyncResult<()>;
    async fn remove_connection(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
    ) -> SyncResult<()>;
    async fn batch_status(&self, request: BatchStatusRequest) -> SyncResult<BatchStatusResponse>;
    async fn connection_count(&self, user_id: &UserId) -> SyncResult<u64>;
    async fn mutual_connections(
        &self,
        current_user: &UserId,
        user_id: &UserId,
    ) -> SyncResult<MutualConnectionsResponse>;
    /// Profile of `user_id` as seen by `current_user`, who must be connected to them.
    async fn connected_profile(
        &self,
        current_user: &UserId,
        user_id: &UserId,
    ) -> SyncResult<ConnectedProfile>;
}

pub struct HttpRemoteStore {
    http: Client,
    base_url: Url,
}

impl HttpRemoteStore {
    /// `base_url` is the server url joined with the API prefix, e.g.
    /// `http://localhost:3500/api/candidate`.
    pub fn new(base_url: Url) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Network(format!("invalid base url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn ack(response: Response) -> SyncResult<()> {
        let response = check_status(response).await?;
        let raw = response.text().await?;
        if raw.trim().is_empty() {
            return Ok(());
        }
        let ack: AckResponse = serde_json::from_str(&raw)
            .map_err(|err| SyncError::InvalidResponse(err.to_string()))?;
        if ack.ok {
            Ok(())
        } else {
            Err(SyncError::ServerRejection {
                status: 200,
                code: ErrorCode::Internal,
                message: "server did not acknowledge the request".to_string(),
            })
        }
    }
}

async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    let fallback = status.canonical_reason().unwrap_or("request failed");
    let api = RejectionBody::parse(&raw).into_api_error(status.as_u16(), fallback);
    Err(SyncError::rejected(status.as_u16(), api))
}

async fn decode<T: DeserializeOwned>(response: Response) -> SyncResult<T> {
    Ok(check_status(response).await?.json().await?)
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn load_category(
        &self,
        category: &CategoryView,
        user_id: &UserId,
    ) -> SyncResult<Vec<UserSummary>> {
        let url = self.endpoint(&["network", category.as_str(), user_id.as_str()])?;
        debug!(%url, "network: GET category");
        decode(self.http.get(url).send().await?).await
    }

    async fn send_request(
        &self,
        request: SendConnectionRequest,
    ) -> SyncResult<SendConnectionResponse> {
        let url = self.endpoint(&["network", "request"])?;
        decode(self.http.post(url).json(&request).send().await?).await
    }

    async fn accept_request(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
    ) -> SyncResult<()> {
        let url = self.endpoint(&["network", "accept", connection_id.as_str()])?;
        let body = ConnectionActionRequest {
            user_id: user_id.clone(),
        };
        Self::ack(self.http.put(url).json(&body).send().await?).await
    }

    async fn decline_request(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
    ) -> SyncResult<()> {
        let url = self.endpoint(&["network", "decline", connection_id.as_str()])?;
        let body = ConnectionActionRequest {
            user_id: user_id.clone(),
        };
        Self::ack(self.http.put(url).json(&body).send().await?).await
    }

    async fn remove_connection(
        &self,
        connection_id: &ConnectionId,
        user_id: &UserId,
    ) -> SyncResult<()> {
        let url = self.endpoint(&["network", "remove", connection_id.as_str()])?;
        let body = ConnectionActionRequest {
            user_id: user_id.clone(),
        };
        Self::ack(self.http.delete(url).json(&body).send().await?).await
    }

    async fn batch_status(&self, request: BatchStatusRequest) -> SyncResult<BatchStatusResponse> {
        let url = self.endpoint(&["network", "status", "batch"])?;
        debug!(targets = request.target_user_ids.len(), "network: POST status batch");
        decode(self.http.post(url).json(&request).send().await?).await
    }

    async fn connection_count(&self, user_id: &UserId) -> SyncResult<u64> {
        let url = self.endpoint(&["activities", "connections", "count", user_id.as_str()])?;
        let response: ConnectionCountResponse = decode(self.http.get(url).send().await?).await?;
        Ok(response.connection_count)
    }

    async fn mutual_connections(
        &self,
        current_user: &UserId,
        user_id: &UserId,
    ) -> SyncResult<MutualConnectionsResponse> {
        let url = self.endpoint(&[
            "activities",
            "connections",
            "mutual",
            current_user.as_str(),
            user_id.as_str(),
        ])?;
        decode(self.http.get(url).send().await?).await
    }

    async fn connected_profile(
        &self,
        current_user: &UserId,
        user_id: &UserId,
    ) -> SyncResult<ConnectedProfile> {
        let url = self.endpoint(&[
            "network",
            "profile",
            current_user.as_str(),
            user_id.as_str(),
        ])?;
        debug!(%url, "network: GET connected profile");
        let response: ConnectedProfileResponse = decode(self.http.get(url).send().await?).await?;
        Ok(response.profile)
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
