//! Consume: bounded, cancellable collection from a single partition
//!
//! Flow per call:
//! 1. Take the topic lock (released on every exit by dropping the guard)
//! 2. Snapshot newest/oldest offsets (best effort, failures are logged)
//! 3. Validate the requested offset against the snapshot
//! 4. Open a partition stream at the offset
//! 5. Collect until cancelled, timed out, `max` reached, or caught up in immediate mode
//!
//! Steps 2 and 4 give up as soon as the caller cancels.

use std::future::Future;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::brokers::error::BrokerError;
use crate::brokers::topic_locks::TopicLocks;
use crate::brokers::Messages;

/// Payloads as they arrive from the partition, in log order
pub type MessageStream = BoxStream<'static, Result<Bytes, BrokerError>>;

/// The partition-level operations the collection loop needs from a log.
#[async_trait]
pub trait PartitionLog: Send + Sync {
    /// First not-yet-written offset (exclusive upper bound)
    async fn newest_offset(&self, topic: &str) -> Result<i64, BrokerError>;

    /// Earliest retained offset
    async fn oldest_offset(&self, topic: &str) -> Result<i64, BrokerError>;

    /// Stream positioned at `offset`. Dropping the stream closes it.
    async fn open(&self, topic: &str, offset: i64) -> Result<MessageStream, BrokerError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumeRequest<'a> {
    pub topic: &'a str,
    pub offset: i64,
    pub immediate: bool,
    pub max: i64,
}

/// Run one consume call against `log`, serialized per topic through `locks`.
///
/// `window` is the time budget of the collection loop.
pub async fn consume_partition<L>(
    log: &L,
    locks: &TopicLocks,
    cancel: &CancellationToken,
    request: ConsumeRequest<'_>,
    window: Duration,
) -> Result<Messages, BrokerError>
where
    L: PartitionLog + ?Sized,
{
    let ConsumeRequest { topic, offset, max, .. } = request;
    let _guard = locks.lock(topic).await;

    let newest = match or_cancelled(cancel, log.newest_offset(topic)).await {
        Ok(newest) => Some(newest),
        Err(e) => {
            error!(topic = %topic, "Newest offset query failed: {}", e);
            None
        }
    };
    let oldest = match or_cancelled(cancel, log.oldest_offset(topic)).await {
        Ok(oldest) => Some(oldest),
        Err(e) => {
            error!(topic = %topic, "Oldest offset query failed: {}", e);
            None
        }
    };

    info!(
        topic = %topic,
        min_offset = ?oldest,
        max_offset = ?newest,
        current_offset = offset,
        "Consuming topic"
    );

    // Nothing new yet
    if newest.is_some_and(|newest| offset >= newest) {
        return Ok(Vec::new());
    }

    if let Some(oldest) = oldest {
        if offset < oldest {
            warn!(
                topic = %topic,
                broker_offset = oldest,
                tracked_offset = offset,
                "Tracked offset is off"
            );
            return Err(BrokerError::OffsetOutOfRange);
        }
    }

    if max <= 0 {
        return Ok(Vec::new());
    }

    let stream = match or_cancelled(cancel, log.open(topic, offset)).await {
        Ok(stream) => stream,
        Err(BrokerError::Cancelled) => {
            debug!(topic = %topic, "Consume cancelled before the partition stream opened");
            return Ok(Vec::new());
        }
        Err(e) => {
            error!(
                topic = %topic,
                min_offset = ?oldest,
                max_offset = ?newest,
                current_offset = offset,
                "Unable to consume topic: {}",
                e
            );
            return Err(e);
        }
    };

    let messages = collect(stream, cancel, request, newest, window).await?;
    debug!(topic = %topic, consumed = messages.len(), "Partition stream closed");
    Ok(messages)
}

/// `Err(Cancelled)` if `cancel` fires before `fut` completes.
async fn or_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BrokerError::Cancelled),
        result = fut => result,
    }
}

async fn collect(
    mut stream: MessageStream,
    cancel: &CancellationToken,
    request: ConsumeRequest<'_>,
    newest: Option<i64>,
    window: Duration,
) -> Result<Messages, BrokerError> {
    let ConsumeRequest { topic, offset, immediate, max } = request;
    let limit = usize::try_from(max).unwrap_or(usize::MAX);
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut messages = Vec::new();
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(topic = %topic, consumed = messages.len(), "Consume cancelled by caller");
                break;
            }
            _ = &mut deadline => {
                debug!(topic = %topic, consumed = messages.len(), "Poll window elapsed");
                break;
            }
            next = stream.next() => match next {
                Some(Ok(payload)) => {
                    messages.push(payload);
                    let consumed = messages.len() as i64;
                    debug!(topic = %topic, consumed, max, "Consumed message");

                    if messages.len() >= limit {
                        break;
                    }
                    // Caught up with the snapshot: a short poll does not wait for more
                    if immediate && newest.is_some_and(|newest| offset + consumed >= newest) {
                        break;
                    }
                }
                // Retention moved past the offset before the first fetch
                Some(Err(BrokerError::OffsetOutOfRange)) if messages.is_empty() => {
                    warn!(topic = %topic, tracked_offset = offset, "Tracked offset is off at fetch");
                    return Err(BrokerError::OffsetOutOfRange);
                }
                Some(Err(e)) => {
                    warn!(topic = %topic, consumed = messages.len(), "Partition stream failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    Ok(messages)
}
