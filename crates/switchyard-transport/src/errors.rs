// [crates/switchyard-transport/src/errors.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("[TRANSPORT_CONNECT_FAULT]: broker connection failed -> {0}")]
    ConnectionFailed(String),

    #[error("[TRANSPORT_PUBLISH_FAULT]: publish rejected after retries -> {0}")]
    PublishFailed(String),

    #[error("[TRANSPORT_SUBSCRIBE_FAULT]: subscribe rejected -> {0}")]
    SubscribeFailed(String),

    #[error("[TRANSPORT_ENCODING_FAULT]: payload could not be serialized -> {0}")]
    Encoding(#[from] serde_json::Error),
}
