//! Brokers: the consume contract and its implementations
//!
//! - `KafkaBroker`: cluster-backed, runs the bounded collection loop per call.
//! - `MemoryBroker`: fixture-backed stand-in with the same contract.

pub mod consume;
pub mod error;
pub mod kafka;
pub mod memory;
pub mod topic_locks;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use error::BrokerError;
pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;
pub use topic_locks::TopicLocks;

/// Payloads returned by a consume call, in log order
pub type Messages = Vec<Bytes>;

/// Broker-reported offset range of a topic: `oldest` inclusive, `newest` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetBounds {
    pub oldest: i64,
    pub newest: i64,
}

/// Operations every log broker implementation satisfies
#[async_trait]
pub trait Broker: Send + Sync {
    /// Connect, retrying until the broker is ready or `cancel` fires.
    ///
    /// Returns `BrokerError::Cancelled` only when the token fires before a
    /// connection is established.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), BrokerError>;

    /// Read up to `max` messages of `topic` starting at `offset`.
    ///
    /// `immediate` selects the short poll window and stops as soon as the
    /// reader has caught up with the newest offset. Cancellation is not an
    /// error: whatever was collected so far is returned.
    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        offset: i64,
        immediate: bool,
        max: i64,
    ) -> Result<Messages, BrokerError>;

    /// Current retained range of `topic`
    async fn offset_bounds(&self, topic: &str) -> Result<OffsetBounds, BrokerError>;

    /// Release held connections. Failures are logged, never returned.
    async fn close_connections(&self);
}
