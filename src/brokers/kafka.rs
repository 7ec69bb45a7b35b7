//! Kafka Broker: cluster-backed implementation of the consume contract
//!
//! One `rskafka` client per connection. Partition clients are opened on first
//! use per topic and cached until `close_connections`. Every client request
//! retries for at most `request_deadline`, so a failed connect falls back to the
//! fixed reconnect backoff and a dead cluster fails offset queries instead of
//! stalling them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::StreamExt;
use parking_lot::RwLock;
use rskafka::client::consumer::{StartOffset, StreamConsumerBuilder};
use rskafka::client::error::{Error as RsKafkaError, ProtocolError};
use rskafka::client::partition::{OffsetAt, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::RecordAndOffset;
use rskafka::BackoffConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::brokers::consume::{consume_partition, ConsumeRequest, MessageStream, PartitionLog};
use crate::brokers::error::BrokerError;
use crate::brokers::topic_locks::TopicLocks;
use crate::brokers::{Broker, Messages, OffsetBounds};
use crate::config::BrokerConfig;

// ==========================================
// CONNECTION (client + partition consumers)
// ==========================================

struct KafkaLog {
    client: Client,
    consumers: DashMap<String, Arc<PartitionClient>>,
    partition: i32,
    fetch_max_bytes: i32,
    fetch_max_wait_ms: i32,
}

impl KafkaLog {
    fn new(client: Client, config: &BrokerConfig) -> Self {
        Self {
            client,
            consumers: DashMap::new(),
            partition: config.partition,
            fetch_max_bytes: config.fetch_max_bytes,
            fetch_max_wait_ms: config.fetch_max_wait_ms,
        }
    }

    async fn partition_client(&self, topic: &str) -> Result<Arc<PartitionClient>, RsKafkaError> {
        if let Some(cached) = self.consumers.get(topic).map(|entry| entry.value().clone()) {
            return Ok(cached);
        }
        let created = Arc::new(
            self.client
                .partition_client(topic.to_string(), self.partition, UnknownTopicHandling::Error)
                .await?,
        );
        self.consumers.insert(topic.to_string(), created.clone());
        debug!(topic = %topic, partition = self.partition, "Partition client opened");
        Ok(created)
    }

    async fn offset_at(&self, topic: &str, at: OffsetAt) -> Result<i64, BrokerError> {
        let query = |e: RsKafkaError| BrokerError::OffsetQuery {
            topic: topic.to_string(),
            reason: e.to_string(),
        };
        let client = self.partition_client(topic).await.map_err(query)?;
        client.get_offset(at).await.map_err(query)
    }
}

#[async_trait]
impl PartitionLog for KafkaLog {
    async fn newest_offset(&self, topic: &str) -> Result<i64, BrokerError> {
        self.offset_at(topic, OffsetAt::Latest).await
    }

    async fn oldest_offset(&self, topic: &str) -> Result<i64, BrokerError> {
        self.offset_at(topic, OffsetAt::Earliest).await
    }

    async fn open(&self, topic: &str, offset: i64) -> Result<MessageStream, BrokerError> {
        let client = self.partition_client(topic).await.map_err(|e| BrokerError::IteratorOpen {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let stream = StreamConsumerBuilder::new(client, StartOffset::At(offset))
            .with_max_batch_size(self.fetch_max_bytes)
            .with_max_wait_ms(self.fetch_max_wait_ms)
            .build()
            .map(|item| item.map(|(record, _high_watermark)| record_payload(record)).map_err(fetch_error));

        Ok(stream.boxed())
    }
}

/// Value bytes of a record. A record without a value has an empty payload.
fn record_payload(record: RecordAndOffset) -> Bytes {
    Bytes::from(record.record.value.unwrap_or_default())
}

fn fetch_error(err: RsKafkaError) -> BrokerError {
    match err {
        RsKafkaError::ServerError {
            protocol_error: ProtocolError::OffsetOutOfRange,
            ..
        } => BrokerError::OffsetOutOfRange,
        other => BrokerError::Connection(other.to_string()),
    }
}

// ==========================================
// KAFKA BROKER
// ==========================================

pub struct KafkaBroker {
    config: BrokerConfig,
    locks: TopicLocks,
    connection: RwLock<Option<Arc<KafkaLog>>>,
    connect_attempts: AtomicU64,
}

impl KafkaBroker {
    /// Unconnected broker. Call `initialize` before consuming.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            locks: TopicLocks::new(),
            connection: RwLock::new(None),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Build and connect, retrying until connected or `cancel` fires.
    pub async fn connect(config: BrokerConfig, cancel: &CancellationToken) -> Result<Self, BrokerError> {
        let broker = Self::new(config);
        broker.initialize(cancel).await?;
        Ok(broker)
    }

    pub fn servers(&self) -> &[String] {
        &self.config.brokers
    }

    /// Connection attempts made by `initialize` so far
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    fn client_builder(&self) -> ClientBuilder {
        ClientBuilder::new(self.config.brokers.clone()).backoff_config(BackoffConfig {
            deadline: Some(self.config.request_deadline()),
            ..Default::default()
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    fn live(&self) -> Result<Arc<KafkaLog>, BrokerError> {
        self.connection.read().clone().ok_or(BrokerError::NotConnected)
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), BrokerError> {
        let backoff = self.config.reconnect_backoff();
        loop {
            let attempt_no = self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            info!(servers = ?self.config.brokers, attempt = attempt_no, "Attempting to connect to kafka backend");

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                result = self.client_builder().build() => result,
            };

            match attempt {
                Ok(client) => {
                    let log = Arc::new(KafkaLog::new(client, &self.config));
                    *self.connection.write() = Some(log);
                    info!(servers = ?self.config.brokers, "Kafka backend initialized");
                    return Ok(());
                }
                Err(e) => {
                    error!(servers = ?self.config.brokers, "{}", BrokerError::from(e));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    async fn consume(
        &self,
        cancel: &CancellationToken,
        topic: &str,
        offset: i64,
        immediate: bool,
        max: i64,
    ) -> Result<Messages, BrokerError> {
        let log = self.live()?;
        let request = ConsumeRequest { topic, offset, immediate, max };
        consume_partition(&*log, &self.locks, cancel, request, self.config.poll_window(immediate)).await
    }

    async fn offset_bounds(&self, topic: &str) -> Result<OffsetBounds, BrokerError> {
        let log = self.live()?;
        let oldest = log.oldest_offset(topic).await?;
        let newest = log.newest_offset(topic).await?;
        Ok(OffsetBounds { oldest, newest })
    }

    async fn close_connections(&self) {
        let taken = self.connection.write().take();
        let Some(log) = taken else {
            debug!("Kafka connections already closed");
            return;
        };

        let consumers = log.consumers.len();
        log.consumers.clear();
        info!(consumers, "Kafka partition consumers closed");

        // Client sockets close once the last in-flight consume drops its handle
        if Arc::strong_count(&log) > 1 {
            debug!("Kafka client still referenced by in-flight consumes");
        }
        drop(log);
        info!(servers = ?self.config.brokers, "Kafka client closed");
    }
}
