//! Error taxonomy shared by the account and link services.
//!
//! `Validation`, `Conflict`, `Auth` and `NotFound` are expected outcomes that the
//! transport translates into client-facing responses. `Storage` and `Internal`
//! are logged and surfaced as a generic internal failure.

use thiserror::Error;

use crate::storage::StorageError;

/// Why an authentication attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidCredentials,
    InvalidToken,
    ExpiredToken,
    RevokedToken,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            AuthFailure::InvalidCredentials => "invalid credentials",
            AuthFailure::InvalidToken => "invalid token",
            AuthFailure::ExpiredToken => "token expired",
            AuthFailure::RevokedToken => "token revoked",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("authentication failed: {0}")]
    Auth(AuthFailure),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[source] StorageError),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    /// True for failures that are not the caller's fault.
    pub fn is_internal(&self) -> bool {
        matches!(self, ServiceError::Storage(_) | ServiceError::Internal(_))
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
