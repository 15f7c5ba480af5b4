use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ConnectionEdge, ConnectionId, EdgeState, UserId};

/// One row of a category view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: UserId,
    #[serde(default, alias = "fullName", alias = "name")]
    pub display_name: String,
    #[serde(default, alias = "title")]
    pub headline: String,
    #[serde(
        default,
        alias = "profileImage",
        alias = "avatar",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_ref: Option<String>,
    /// Edge that placed this user in the category (pending, sent, connections).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
}

impl UserSummary {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            headline: String::new(),
            avatar_ref: None,
            connection_id: None,
        }
    }

    pub fn with_connection(mut self, connection_id: impl Into<ConnectionId>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn has_connection(&self, connection_id: &ConnectionId) -> bool {
        self.connection_id.as_ref() == Some(connection_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendConnectionRequest {
    pub requester_id: UserId,
    pub recipient_id: UserId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendConnectionResponse {
    pub connection_id: ConnectionId,
}

/// Body of accept, decline and remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionActionRequest {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    #[serde(default = "default_ok")]
    pub ok: bool,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusRequest {
    pub user_id: UserId,
    pub target_user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    #[serde(default)]
    pub statuses: HashMap<UserId, StatusReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    None,
    #[serde(alias = "pending_sent", alias = "pending_received")]
    Pending,
    #[serde(alias = "accepted")]
    Connected,
}

/// Server view of one pairwise relationship in a batch status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: WireStatus,
    #[serde(default)]
    pub is_requester: bool,
    #[serde(default)]
    pub can_connect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
}

impl StatusReport {
    pub fn none() -> Self {
        Self {
            status: WireStatus::None,
            is_requester: false,
            can_connect: true,
            connection_id: None,
        }
    }

    pub fn pending(is_requester: bool, connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            status: WireStatus::Pending,
            is_requester,
            can_connect: false,
            connection_id: Some(connection_id.into()),
        }
    }

    pub fn connected(connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            status: WireStatus::Connected,
            is_requester: false,
            can_connect: false,
            connection_id: Some(connection_id.into()),
        }
    }

    /// Rebuilds the edge between `current_user` and `target` from this report.
    /// `is_requester` is relative to the current user.
    pub fn to_edge(&self, current_user: &UserId, target: &UserId) -> Option<ConnectionEdge> {
        let state = match self.status {
            WireStatus::None => return None,
            WireStatus::Pending => EdgeState::Pending,
            WireStatus::Connected => EdgeState::Accepted,
        };
        let (requester_id, recipient_id) = if self.is_requester {
            (current_user.clone(), target.clone())
        } else {
            (target.clone(), current_user.clone())
        };
        Some(ConnectionEdge {
            connection_id: self.connection_id.clone(),
            requester_id,
            recipient_id,
            state,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCountResponse {
    #[serde(default)]
    pub connection_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualConnectionsResponse {
    #[serde(default)]
    pub mutual_connections: Vec<UserSummary>,
    #[serde(default)]
    pub other_connections: Vec<UserSummary>,
}

/// Profile of another user as seen by a connection of theirs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedProfile {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "fullName", alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub headline: String,
    #[serde(
        default,
        alias = "profileImageUrl",
        alias = "profileImage",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_ref: Option<String>,
    #[serde(default, alias = "bannerImageUrl", skip_serializing_if = "Option::is_none")]
    pub banner_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub about: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    /// Server-formatted date the edge was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedProfileResponse {
    pub profile: ConnectedProfile,
}
