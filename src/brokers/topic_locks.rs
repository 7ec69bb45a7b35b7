//! Topic Locks: one async mutex per topic, created lazily on first use
//!
//! Lookup is a plain map read. A miss takes the registry-wide creation guard,
//! checks again, and the creator locks the new entry before anyone else can see it.

use std::sync::Arc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the duration of one consume call. Dropping it releases the topic.
pub struct TopicGuard {
    topic: String,
    _guard: OwnedMutexGuard<()>,
}

impl TopicGuard {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for TopicGuard {
    fn drop(&mut self) {
        tracing::trace!(topic = %self.topic, "Topic lock released");
    }
}

#[derive(Default)]
pub struct TopicLocks {
    creation: Mutex<()>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TopicLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `topic` is free and take it.
    pub async fn lock(&self, topic: &str) -> TopicGuard {
        if let Some(existing) = self.get(topic) {
            return self.wrap(topic, existing.lock_owned().await);
        }

        let creating = self.creation.lock().await;
        if let Some(existing) = self.get(topic) {
            drop(creating);
            return self.wrap(topic, existing.lock_owned().await);
        }

        // Fresh mutex with no other handle: resolves on first poll
        let lock = Arc::new(Mutex::new(()));
        let guard = lock.clone().lock_owned().await;
        self.locks.insert(topic.to_string(), lock);
        drop(creating);

        tracing::debug!(topic = %topic, "Topic lock created");
        self.wrap(topic, guard)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.locks.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn get(&self, topic: &str) -> Option<Arc<Mutex<()>>> {
        self.locks.get(topic).map(|entry| entry.value().clone())
    }

    fn wrap(&self, topic: &str, guard: OwnedMutexGuard<()>) -> TopicGuard {
        TopicGuard {
            topic: topic.to_string(),
            _guard: guard,
        }
    }
}
