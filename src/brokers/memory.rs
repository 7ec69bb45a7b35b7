//! Memory Broker: fixture-backed stand-in for the Kafka broker
//!
//! Topics are plain vectors indexed by offset. A single low-water mark applies
//! to every topic.

use std::collections::HashMap;
use std::path::Path;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::brokers::error::BrokerError;
use crate::brokers::{Broker, Messages, OffsetBounds};

pub const FIXTURE_TOPIC: &str = "test-topic-1";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("fixture read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("fixture parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Default)]
struct MemoryState {
    client: bool,
    consumer: bool,
    topics: HashMap<String, Vec<Bytes>>,
    low_water_mark: i64,
}

pub struct MemoryBroker {
    fixture: HashMap<String, Vec<Bytes>>,
    state: RwLock<MemoryState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Connected broker seeded with `test-topic-1 = [msg0..msg5]`
    pub fn new() -> Self {
        let mut fixture = HashMap::new();
        fixture.insert(
            FIXTURE_TOPIC.to_string(),
            (0..6).map(|i| Bytes::from(format!("msg{}", i))).collect(),
        );
        Self::from_topics(fixture)
    }

    /// Connected broker seeded with the given topics
    pub fn from_topics(fixture: HashMap<String, Vec<Bytes>>) -> Self {
        let broker = Self {
            fixture,
            state: RwLock::new(MemoryState::default()),
        };
        broker.seed();
        broker
    }

    /// Seed from a JSON object of topic name to an array of string payloads
    pub fn from_fixture_file(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        let fixture = parsed
            .into_iter()
            .map(|(topic, msgs)| (topic, msgs.into_iter().map(Bytes::from).collect()))
            .collect();
        Ok(Self::from_topics(fixture))
    }

    /// (client, consumer) connectivity flags
    pub fn is_connected(&self) -> (bool, bool) {
        let state = self.state.read();
        (state.client, state.consumer)
    }

    pub fn low_water_mark(&self) -> i64 {
        self.state.read().low_water_mark
    }

    /// Offsets below `offset` become out of range. Negative marks clamp to 0.
    pub fn set_low_water_mark(&self, offset: i64) {
        self.state.write().low_water_mark = offset.max(0);
    }

    /// Append to a topic, returning the offset of the new message
    pub fn append(&self, topic: &str, payload: Bytes) -> i64 {
        let mut state = self.state.write();
        let msgs = state.topics.entry(topic.to_string()).or_default();
        msgs.push(payload);
        msgs.len() as i64 - 1
    }

    pub fn topics(&self) -> HashMap<String, Vec<Bytes>> {
        self.state.read().topics.clone()
    }

    fn seed(&self) {
        let mut state = self.state.write();
        state.topics = self.fixture.clone();
        state.low_water_mark = 0;
        state.client = true;
        state.consumer = true;
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn initialize(&self, _cancel: &CancellationToken) -> Result<(), BrokerError> {
        self.seed();
        tracing::info!(topics = self.fixture.len(), "Memory broker initialized");
        Ok(())
    }

    async fn consume(
        &self,
        _cancel: &CancellationToken,
        topic: &str,
        offset: i64,
        _immediate: bool,
        max: i64,
    ) -> Result<Messages, BrokerError> {
        let state = self.state.read();
        if !state.consumer {
            return Err(BrokerError::NotConnected);
        }

        let msgs = state.topics.get(topic).map(Vec::as_slice).unwrap_or_default();
        if offset >= msgs.len() as i64 {
            return Ok(Vec::new());
        }
        if offset < 0 || offset < state.low_water_mark {
            return Err(BrokerError::OffsetOutOfRange);
        }

        let limit = usize::try_from(max).unwrap_or(0);
        Ok(msgs.iter().skip(offset as usize).take(limit).cloned().collect())
    }

    async fn offset_bounds(&self, topic: &str) -> Result<OffsetBounds, BrokerError> {
        let state = self.state.read();
        if !state.client {
            return Err(BrokerError::NotConnected);
        }
        let newest = state.topics.get(topic).map_or(0, |msgs| msgs.len() as i64);
        Ok(OffsetBounds {
            oldest: state.low_water_mark.min(newest),
            newest,
        })
    }

    async fn close_connections(&self) {
        let mut state = self.state.write();
        state.client = false;
        state.consumer = false;
    }
}
