use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_core::{PubSubError, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ErrorOutput {
    pub error: String,
    pub status: u16,
}

impl ErrorOutput {
    pub fn new(error: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: error.into(),
            status: status.as_u16(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("create message error: {0}")]
    CreateMessageError(String),

    #[error("seller cannot open a chat on their own product")]
    SelfChatNotAllowed,

    #[error("chat save failed: {0}")]
    ChatSaveFailed(String),

    #[error("chat room creation failed: {0}")]
    ChatRoomCreationFailed(String),

    #[error("chat room info fetch failed: {0}")]
    ChatRoomInfoFetchFailed(String),

    #[error("sql error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("store error: {0}")]
    StoreError(StoreError),

    #[error("pubsub error: {0}")]
    PubSubError(#[from] PubSubError),

    #[error("anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            e => Self::StoreError(e),
        }
    }
}

impl AppError {
    /// Errors that carry meaning for the caller, as opposed to infrastructure failures.
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            Self::SqlxError(_)
                | Self::StoreError(_)
                | Self::PubSubError(_)
                | Self::AnyhowError(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::ChatNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::CreateMessageError(_) | Self::SelfChatNotAllowed => StatusCode::BAD_REQUEST,
            Self::ChatSaveFailed(_)
            | Self::ChatRoomCreationFailed(_)
            | Self::ChatRoomInfoFetchFailed(_)
            | Self::SqlxError(_)
            | Self::StoreError(_)
            | Self::PubSubError(_)
            | Self::AnyhowError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response<axum::body::Body> {
        let status = self.status();
        (status, Json(ErrorOutput::new(self.to_string(), status))).into_response()
    }
}
