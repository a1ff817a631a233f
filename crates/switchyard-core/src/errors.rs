// [crates/switchyard-core/src/errors.rs]
//! Error-kind taxonomy shared by every layer above storage and transport.
//!
//! `ErrorKind` is the stable label the REST boundary serializes; `CoreError`
//! is the internal enum a component returns. Keeping the two separate means
//! a new internal failure mode never leaks an implementation detail into the
//! wire contract (spec §7: "the message contains no internals").

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    PreconditionFailed,
    CommandTimeout,
    TransportUnavailable,
    StorageUnavailable,
    Duplicate,
    RateLimited,
    Internal,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("[CORE_INVALID_INPUT]: {0}")]
    InvalidInput(String),

    #[error("[CORE_UNAUTHENTICATED]: {0}")]
    Unauthenticated(String),

    #[error("[CORE_FORBIDDEN]: {0}")]
    Forbidden(String),

    #[error("[CORE_NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[CORE_CONFLICT]: {0}")]
    Conflict(String),

    #[error("[CORE_PRECONDITION_FAILED]: {0}")]
    PreconditionFailed(String),

    #[error("[CORE_COMMAND_TIMEOUT]: {0}")]
    CommandTimeout(String),

    #[error("[CORE_TRANSPORT_UNAVAILABLE]: {0}")]
    TransportUnavailable(String),

    #[error("[CORE_STORAGE_UNAVAILABLE]: {0}")]
    StorageUnavailable(String),

    #[error("[CORE_DUPLICATE]: {0}")]
    Duplicate(String),

    #[error("[CORE_RATE_LIMITED]: {0}")]
    RateLimited(String),

    #[error("[CORE_INTERNAL]: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            CoreError::CommandTimeout(_) => ErrorKind::CommandTimeout,
            CoreError::TransportUnavailable(_) => ErrorKind::TransportUnavailable,
            CoreError::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            CoreError::Duplicate(_) => ErrorKind::Duplicate,
            CoreError::RateLimited(_) => ErrorKind::RateLimited,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message handed back to an external caller. Internal variants are
    /// deliberately flattened to a generic phrase; everything else is
    /// considered safe to echo because it is already a validation/authz
    /// label, never a formatted system error.
    pub fn public_message(&self) -> String {
        match self {
            CoreError::Internal(_) | CoreError::StorageUnavailable(_) => {
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}
