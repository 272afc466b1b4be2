//! In-memory transport over tokio broadcast channels.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{Subscription, Transport};
use crate::types::Result;

/// Process-local transport: one broadcast channel per topic plus a shared map
/// as the durable store.
///
/// Cheap to clone; all clones share the same topics and store.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
    store: Arc<RwLock<HashMap<String, String>>>,
    capacity: usize,
}

impl InMemoryTransport {
    /// Create a transport whose per-subscriber buffers hold `capacity`
    /// messages. Subscribers lagging past the buffer lose the oldest
    /// messages (logged, not fatal).
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // A send error only means there are no subscribers right now.
        let _ = self.sender(topic).await.send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let rx = self.sender(topic).await.subscribe();
        Ok(Box::new(BroadcastSubscription { rx }))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.read().await.get(key).cloned())
    }
}

struct BroadcastSubscription {
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for BroadcastSubscription {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "subscriber lagged, dropping oldest messages");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
