// [apps/control-plane/src/error.rs]
//! REST/WebSocket boundary error envelope. Every handler returns
//! `Result<T, ApiError>`; `ApiError` carries the stable `ErrorKind`, a
//! correlation id for cross-referencing logs, and a caller-safe message
//! (spec §7: "caller receives `{kind, correlationId, message}`").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use switchyard_core::errors::{CoreError, ErrorKind};
use switchyard_db::errors::DbError;
use switchyard_transport::errors::TransportError;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub correlation_id: String,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, correlation_id: uuid::Uuid::new_v4().to_string(), message: message.into() }
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::PreconditionFailed => StatusCode::CONFLICT,
            ErrorKind::CommandTimeout => StatusCode::CONFLICT,
            ErrorKind::TransportUnavailable | ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Duplicate => StatusCode::OK,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self::new(error.kind(), error.public_message())
    }
}

impl From<DbError> for ApiError {
    fn from(error: DbError) -> Self {
        CoreError::from(error).into()
    }
}

impl From<TransportError> for ApiError {
    fn from(_error: TransportError) -> Self {
        Self::new(ErrorKind::TransportUnavailable, "transport unavailable".to_string())
    }
}
