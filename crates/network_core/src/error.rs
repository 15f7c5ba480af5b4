use shared::{
    domain::{CategoryView, ConnectionId, InvalidTransition, UserId},
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// Key of an in-flight mutation: the recipient for a send, the edge for
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
    User(UserId),
    Connection(ConnectionId),
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user_id) => write!(f, "user:{user_id}"),
            Self::Connection(connection_id) => write!(f, "connection:{connection_id}"),
        }
    }
}

impl From<UserId> for ActionKey {
    fn from(value: UserId) -> Self {
        Self::User(value)
    }
}

impl From<ConnectionId> for ActionKey {
    fn from(value: ConnectionId) -> Self {
        Self::Connection(value)
    }
}

/// Every failure the synchronizer surfaces. Cloneable so that callers
/// coalesced onto one batch request all observe the same error.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("server rejected request ({status}): {message}")]
    ServerRejection {
        status: u16,
        code: ErrorCode,
        message: String,
    },
    #[error("an action is already in flight for {key}")]
    ConcurrentAction { key: ActionKey },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
    #[error("failed to load category {category}: {source}")]
    CategoryLoad {
        category: CategoryView,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn rejected(status: u16, api: ApiError) -> Self {
        if api.code == ErrorCode::NotFound {
            return Self::NotFound {
                message: api.message,
            };
        }
        Self::ServerRejection {
            status,
            code: api.code,
            message: api.message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::CategoryLoad { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ServerRejection {
                code: ErrorCode::Conflict,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::InvalidResponse(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
