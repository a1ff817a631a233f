// [crates/switchyard-db/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("[DB_CONNECTION_FAULT]: database link failed -> {0}")]
    ConnectionError(String),

    #[error("[DB_CONFIG_FAULT]: configuration missing or malformed -> {0}")]
    ConfigurationError(String),

    #[error("[DB_QUERY_FAULT]: query rejected -> {0}")]
    QueryError(#[from] libsql::Error),

    #[error("[DB_MAPPING_FAULT]: row could not be mapped to the domain type -> {0}")]
    MappingError(String),

    #[error("[DB_NOT_FOUND]: {0}")]
    NotFound(String),

    #[error("[DB_CONFLICT]: {0}")]
    Conflict(String),

    #[error("[DB_TRANSACTION_FAULT]: transaction failed to commit -> {0}")]
    TransactionError(String),
}

impl From<DbError> for switchyard_core::errors::CoreError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound(detail) => switchyard_core::errors::CoreError::NotFound(detail),
            DbError::Conflict(detail) => switchyard_core::errors::CoreError::Conflict(detail),
            other => switchyard_core::errors::CoreError::StorageUnavailable(other.to_string()),
        }
    }
}
