//! Relay: the caller side of the consume contract
//!
//! Tracks one checkpoint per topic, polls the broker from it, and advances by
//! the number of messages returned. One worker task per topic.

use std::sync::Arc;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::brokers::{Broker, BrokerError};
use crate::config::RelayConfig;

/// A consumed message tagged with its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub offset: i64,
    pub payload: Bytes,
}

#[derive(Serialize)]
struct DeliveryLine<'a> {
    topic: &'a str,
    offset: i64,
    payload: std::borrow::Cow<'a, str>,
}

impl Delivery {
    /// One JSON object per delivery, payload decoded as (lossy) UTF-8
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&DeliveryLine {
            topic: &self.topic,
            offset: self.offset,
            payload: String::from_utf8_lossy(&self.payload),
        })
    }
}

pub trait Sink: Send + Sync {
    fn deliver(&self, delivery: Delivery);
}

// ==========================================
// CHECKPOINTS
// ==========================================

/// Next offset to read, per topic. Unknown topics start at 0.
#[derive(Default)]
pub struct Checkpoints {
    next: DashMap<String, i64>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, topic: &str) -> i64 {
        self.next.get(topic).map_or(0, |entry| *entry.value())
    }

    pub fn advance(&self, topic: &str, consumed: usize) -> i64 {
        let mut entry = self.next.entry(topic.to_string()).or_insert(0);
        *entry += consumed as i64;
        *entry
    }

    pub fn reset(&self, topic: &str, offset: i64) {
        self.next.insert(topic.to_string(), offset);
    }
}

// ==========================================
// RELAY
// ==========================================

pub struct Relay {
    broker: Arc<dyn Broker>,
    config: RelayConfig,
    checkpoints: Checkpoints,
}

impl Relay {
    pub fn new(broker: Arc<dyn Broker>, config: RelayConfig) -> Self {
        Self {
            broker,
            config,
            checkpoints: Checkpoints::new(),
        }
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    /// One consume at the topic's checkpoint.
    ///
    /// A stale checkpoint is moved to the broker's oldest offset and yields no
    /// deliveries for this round.
    pub async fn poll_topic(&self, cancel: &CancellationToken, topic: &str) -> Result<Vec<Delivery>, BrokerError> {
        let offset = self.checkpoints.get(topic);
        let result = self
            .broker
            .consume(cancel, topic, offset, self.config.immediate, self.config.batch)
            .await;

        match result {
            Ok(msgs) => {
                self.checkpoints.advance(topic, msgs.len());
                Ok(msgs
                    .into_iter()
                    .zip(offset..)
                    .map(|(payload, offset)| Delivery {
                        topic: topic.to_string(),
                        offset,
                        payload,
                    })
                    .collect())
            }
            Err(BrokerError::OffsetOutOfRange) => {
                let bounds = self.broker.offset_bounds(topic).await?;
                warn!(
                    topic = %topic,
                    tracked_offset = offset,
                    oldest_offset = bounds.oldest,
                    "Checkpoint fell behind retention, resynchronizing"
                );
                self.checkpoints.reset(topic, bounds.oldest);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Poll every configured topic on its own task until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken, sink: Arc<dyn Sink>) {
        let mut workers = JoinSet::new();
        for topic in self.config.topics.clone() {
            let relay = self.clone();
            let cancel = cancel.clone();
            let sink = sink.clone();
            workers.spawn(async move { relay.poll_loop(cancel, topic, sink).await });
        }

        info!(topics = ?self.config.topics, "Relay started");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Relay worker panicked: {}", e);
            }
        }
        info!("Relay stopped");
    }

    async fn poll_loop(&self, cancel: CancellationToken, topic: String, sink: Arc<dyn Sink>) {
        let interval = self.config.poll_interval();
        while !cancel.is_cancelled() {
            match self.poll_topic(&cancel, &topic).await {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        sink.deliver(delivery);
                    }
                }
                Err(e) => error!(topic = %topic, "Poll failed: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
