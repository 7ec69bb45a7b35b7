//! Error types for the broker layer

use thiserror::Error;

/// Errors that can occur while talking to a log broker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Requested offset precedes the retained window. The caller must resynchronize.
    #[error("offset is off")]
    OffsetOutOfRange,

    /// The partition stream could not be opened
    #[error("unable to consume topic {topic}: {reason}")]
    IteratorOpen { topic: String, reason: String },

    /// Oldest/newest offset query failed
    #[error("offset query failed for topic {topic}: {reason}")]
    OffsetQuery { topic: String, reason: String },

    /// Cluster connection could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// Consume called without a live connection
    #[error("broker is not connected")]
    NotConnected,

    /// Initialize gave up because its cancel token fired
    #[error("cancelled")]
    Cancelled,
}

impl From<rskafka::client::error::Error> for BrokerError {
    fn from(err: rskafka::client::error::Error) -> Self {
        BrokerError::Connection(err.to_string())
    }
}
