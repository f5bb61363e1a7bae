use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::error::{CredentialError, CryptoError, GroupError};
use parley_store::StoreError;

/// Why a single client action was rejected.
///
/// Every variant except `Auth` is caught at the action boundary and turned
/// into an `error` event for the acting session; the session keeps running.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] CredentialError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Permission(String),

    #[error("Encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    #[error("Storage unavailable")]
    Persistence(#[source] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl HubError {
    /// Collaborator failures, with `NotFound` mapped to the named entity.
    pub fn store(what: &'static str) -> impl FnOnce(StoreError) -> HubError {
        move |e| match e {
            StoreError::NotFound => HubError::NotFound(what),
            other => HubError::Persistence(other),
        }
    }
}

impl From<GroupError> for HubError {
    fn from(e: GroupError) -> Self {
        match e {
            GroupError::NotCreator(_) => HubError::Permission(e.to_string()),
            GroupError::MemberNotFound => HubError::NotFound("Member"),
            GroupError::AlreadyMember
            | GroupError::CreatorImmutable
            | GroupError::CreatorCannotLeave
            | GroupError::EmptyName => HubError::BadRequest(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HubError> for ServerError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Auth(_) => ServerError::Unauthorized(e.to_string()),
            HubError::NotFound(_) => ServerError::NotFound(e.to_string()),
            HubError::Permission(msg) => ServerError::Forbidden(msg),
            HubError::BadRequest(msg) => ServerError::BadRequest(msg),
            HubError::Encryption(_) => ServerError::BadRequest(e.to_string()),
            HubError::Persistence(inner) => ServerError::Internal(inner.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
