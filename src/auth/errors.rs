use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::auth::{dto::MessageResponse, repo::StoreError};

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Username or email already exists")]
    Conflict,

    #[error("Invalid verification token")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Please verify your email first")]
    EmailNotVerified,

    #[error("User not found")]
    NotFound,

    #[error("Password reset token is invalid or has expired")]
    InvalidOrExpiredToken,

    /// Record is persisted, but the mail never left.
    #[error("Failed to send email")]
    Mail(#[source] anyhow::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::Conflict
            | AuthError::InvalidToken
            | AuthError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::EmailNotVerified => StatusCode::UNAUTHORIZED,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Mail(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text rendering for the endpoints a browser opens straight from a mail link.
    pub fn into_text_response(self) -> Response {
        self.log();
        (self.status_code(), self.to_string()).into_response()
    }

    fn log(&self) {
        match self {
            AuthError::Mail(e) => error!(error = %format!("{e:#}"), "mail delivery failed"),
            AuthError::Internal(e) => error!(error = %format!("{e:#}"), "internal error"),
            _ => {}
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => AuthError::Conflict,
            StoreError::Backend(e) => AuthError::Internal(e.context("credential store")),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        (
            status,
            Json(MessageResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
