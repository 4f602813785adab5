use mealsync_shared::errors::{AppError, ErrorCode};

/// What a room/message lookup was looking for, for NotFound reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Room(String),
    Message(uuid::Uuid),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Room(id) => write!(f, "room '{id}'"),
            Missing::Message(id) => write!(f, "message '{id}'"),
        }
    }
}

/// Failure taxonomy shared by the store, the send pipeline and the clients.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Rejected input: empty message, missing room identity fields.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(Missing),

    /// Store unreachable or the write did not commit. Blocks any relay.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Gateway connection dropped or the gateway task is gone.
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn room_not_found(room_id: impl Into<String>) -> Self {
        Self::NotFound(Missing::Room(room_id.into()))
    }

    pub fn message_not_found(message_id: uuid::Uuid) -> Self {
        Self::NotFound(Missing::Message(message_id))
    }

    /// Short machine-readable reason, used as a metrics label and in socket error events.
    pub fn reason(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation",
            ChatError::NotFound(_) => "not_found",
            ChatError::Persistence(_) => "persistence",
            ChatError::Transport(_) => "transport",
        }
    }
}

impl From<diesel::result::Error> for ChatError {
    fn from(err: diesel::result::Error) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for ChatError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Persistence(format!("store task aborted: {err}"))
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(message) => AppError::new(ErrorCode::ValidationError, message),
            ChatError::NotFound(Missing::Room(id)) => AppError::with_details(
                ErrorCode::RoomNotFound,
                format!("room '{id}' not found"),
                serde_json::json!({ "room_id": id }),
            ),
            ChatError::NotFound(Missing::Message(id)) => AppError::with_details(
                ErrorCode::MessageNotFound,
                format!("message '{id}' not found"),
                serde_json::json!({ "message_id": id }),
            ),
            ChatError::Persistence(message) => {
                tracing::error!(error = %message, "chat store failure");
                AppError::unavailable("chat store unavailable")
            }
            ChatError::Transport(message) => {
                tracing::error!(error = %message, "chat gateway failure");
                AppError::unavailable("chat gateway unavailable")
            }
        }
    }
}
