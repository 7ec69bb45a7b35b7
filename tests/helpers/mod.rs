#![allow(dead_code)]

use bytes::Bytes;
use logpull::config::{Backend, RelayConfig};
use logpull::relay::{Delivery, Sink};
use parking_lot::Mutex;

pub fn payloads(messages: &[Bytes]) -> Vec<String> {
    messages.iter().map(|m| String::from_utf8_lossy(m).into_owned()).collect()
}

pub fn relay_config(topics: &[&str], batch: i64) -> RelayConfig {
    RelayConfig {
        backend: Backend::Memory,
        topics: topics.iter().map(|t| t.to_string()).collect(),
        poll_ms: 10,
        batch,
        immediate: true,
        fixture_path: None,
    }
}

/// Keeps every delivery in arrival order
#[derive(Default)]
pub struct CollectingSink {
    pub deliveries: Mutex<Vec<Delivery>>,
}

impl CollectingSink {
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn for_topic(&self, topic: &str) -> Vec<(i64, String)> {
        self.deliveries
            .lock()
            .iter()
            .filter(|d| d.topic == topic)
            .map(|d| (d.offset, String::from_utf8_lossy(&d.payload).into_owned()))
            .collect()
    }
}

impl Sink for CollectingSink {
    fn deliver(&self, delivery: Delivery) {
        self.deliveries.lock().push(delivery);
    }
}
