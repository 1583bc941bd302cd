use reqwest::StatusCode;
use thiserror::Error;

use super::repository::StorageError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Access and refresh tokens must not be empty")]
    EmptyToken,

    #[error("Identity provider rejected the request: {status} {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No login in progress")]
    NoPendingLogin,

    #[error("Login state mismatch - the callback does not belong to this login attempt")]
    StateMismatch,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("Session storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    pub(crate) fn rejected(status: StatusCode, body: &str) -> Self {
        AuthError::Rejected {
            status,
            body: crate::api::error::truncate_body(body),
        }
    }
}
