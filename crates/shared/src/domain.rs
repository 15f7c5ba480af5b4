use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConnectionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    Pending,
    Accepted,
}

/// The four relationship-changing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeAction {
    Send,
    Accept,
    Decline,
    Remove,
}

impl EdgeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Remove => "remove",
        }
    }

    /// Valid transitions: none -> pending -> {accepted | none}, accepted -> none.
    pub fn apply(self, from: Option<EdgeState>) -> Result<Option<EdgeState>, InvalidTransition> {
        match (self, from) {
            (Self::Send, None) => Ok(Some(EdgeState::Pending)),
            (Self::Accept, Some(EdgeState::Pending)) => Ok(Some(EdgeState::Accepted)),
            (Self::Decline, Some(EdgeState::Pending)) => Ok(None),
            (Self::Remove, Some(EdgeState::Accepted)) => Ok(None),
            (action, from) => Err(InvalidTransition { action, from }),
        }
    }
}

impl fmt::Display for EdgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {action} an edge in state {}", describe_state(*from))]
pub struct InvalidTransition {
    pub action: EdgeAction,
    pub from: Option<EdgeState>,
}

fn describe_state(state: Option<EdgeState>) -> &'static str {
    match state {
        None => "none",
        Some(EdgeState::Pending) => "pending",
        Some(EdgeState::Accepted) => "accepted",
    }
}

/// Server-held relationship record between two users.
///
/// `connection_id` is absent while an optimistic send is unconfirmed, or when
/// the status response that produced this edge omitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<ConnectionId>,
    pub requester_id: UserId,
    pub recipient_id: UserId,
    pub state: EdgeState,
}

impl ConnectionEdge {
    pub fn requested(requester_id: UserId, recipient_id: UserId) -> Self {
        Self {
            connection_id: None,
            requester_id,
            recipient_id,
            state: EdgeState::Pending,
        }
    }

    pub fn with_connection_id(mut self, connection_id: ConnectionId) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    /// The other side of the edge as seen from `me`.
    pub fn counterpart(&self, me: &UserId) -> &UserId {
        if &self.requester_id == me {
            &self.recipient_id
        } else {
            &self.requester_id
        }
    }

    /// Applies `action`, returning `None` when the edge is deleted.
    pub fn apply(&self, action: EdgeAction) -> Result<Option<Self>, InvalidTransition> {
        Ok(action.apply(Some(self.state))?.map(|state| Self {
            state,
            ..self.clone()
        }))
    }
}

/// Relationship between the current user and another user, as the UI sees it.
///
/// `PendingSent` and `PendingReceived` are never stored; they come from
/// [`ConnectionStatus::derive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    None,
    PendingSent,
    PendingReceived,
    Connected,
}

impl ConnectionStatus {
    pub fn derive(edge: Option<&ConnectionEdge>, current_user: &UserId) -> Self {
        match edge {
            None => Self::None,
            Some(edge) => match edge.state {
                EdgeState::Accepted => Self::Connected,
                EdgeState::Pending if &edge.requester_id == current_user => Self::PendingSent,
                EdgeState::Pending => Self::PendingReceived,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::None => "none",
            Self::PendingSent => "pending_sent",
            Self::PendingReceived => "pending_received",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, server-filtered view of user summaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CategoryView {
    Suggestions,
    Connections,
    Pending,
    Sent,
    Other(String),
}

impl CategoryView {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Suggestions => "suggestions",
            Self::Connections => "connections",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Other(name) => name,
        }
    }
}

impl Default for CategoryView {
    fn default() -> Self {
        Self::Connections
    }
}

impl fmt::Display for CategoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryView {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "suggestions" => Self::Suggestions,
            "connections" => Self::Connections,
            "pending" => Self::Pending,
            "sent" => Self::Sent,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<String> for CategoryView {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(view) => view,
            Err(never) => match never {},
        }
    }
}

impl From<CategoryView> for String {
    fn from(value: CategoryView) -> Self {
        value.as_str().to_string()
    }
}
