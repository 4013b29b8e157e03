//! Typed failures returned by registry operations.
//!
//! Every registry operation either succeeds with a result value or returns
//! one of these variants. The session and admin boundaries map them onto
//! wire error codes / HTTP statuses; the kernel itself never panics on a
//! caller mistake.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("topic '{0}' already exists")]
    TopicAlreadyExists(String),

    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("client '{client_id}' is not subscribed to topic '{topic}'")]
    SubscriptionNotFound { client_id: String, topic: String },

    #[error("topic name must be a non-empty string")]
    InvalidTopicName,
}
