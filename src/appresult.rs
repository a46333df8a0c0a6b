use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not allowed")]
    Unauthorized,
    #[error("room not found")]
    RoomNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("room already has an active session")]
    AlreadyActiveSession,
    #[error("session can no longer be reopened today")]
    CutoffExceeded,
    #[error("session has not been started yet")]
    SessionNotStarted,
    #[error("session is closed")]
    SessionClosed,
    #[error("already enrolled in this room")]
    AlreadyEnrolled,
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable code; clients branch on this, not the message.
    pub fn code(&self) -> &'static str {
        use AppError::*;
        match self {
            Unauthorized => "UNAUTHORIZED",
            RoomNotFound => "ROOM_NOT_FOUND",
            SessionNotFound => "SESSION_NOT_FOUND",
            MessageNotFound => "MESSAGE_NOT_FOUND",
            UserNotFound => "USER_NOT_FOUND",
            AlreadyActiveSession => "ALREADY_ACTIVE_SESSION",
            CutoffExceeded => "CUTOFF_EXCEEDED",
            SessionNotStarted => "SESSION_NOT_STARTED",
            SessionClosed => "SESSION_CLOSED",
            AlreadyEnrolled => "ALREADY_ENROLLED",
            Validation(_) => "VALIDATION_ERROR",
            Database(_) | Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Unauthorized | CutoffExceeded | SessionNotStarted => StatusCode::FORBIDDEN,
            RoomNotFound | SessionNotFound | MessageNotFound | UserNotFound => StatusCode::NOT_FOUND,
            AlreadyActiveSession | AlreadyEnrolled => StatusCode::CONFLICT,
            SessionClosed => StatusCode::LOCKED,
            Validation(_) => StatusCode::BAD_REQUEST,
            Database(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = match self {
            AppError::Database(_) | AppError::Internal(_) => "internal error".to_owned(),
            other => other.to_string(),
        };
        ErrorBody { code: self.code(), message }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Database(err) = &self {
            error!(error = %err, "database error");
        } else if let AppError::Internal(err) = &self {
            error!(error = %err, backtrace = %err.backtrace(), "internal error");
        }

        (self.status(), Json(self.body())).into_response()
    }
}
