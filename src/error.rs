//! Error types for the data router.

use crate::types::RequestId;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No subscription found for {0}")]
    SubscriptionNotFound(RequestId),

    #[error("Request id already in use: {0}")]
    DuplicateRequestId(RequestId),

    #[error("Reply channel closed")]
    ReplyChannelClosed,

    #[error("Invalid request id: {0}")]
    InvalidRequestId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidConfig(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
