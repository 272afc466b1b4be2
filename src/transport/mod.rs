//! Transport abstraction.
//!
//! The bus requires only two capabilities from its backing store:
//! publish/subscribe on a named broadcast topic, and set/get on a durable
//! key-value store. Deployments back this with a networked store; tests and
//! single-process setups use [`InMemoryTransport`].
//!
//! Fan-out is unbounded and delivery is at-most-once per subscriber; flow
//! control, where needed, belongs to the payload handlers.

use async_trait::async_trait;

use crate::types::Result;

mod memory;

pub use memory::InMemoryTransport;

/// A live subscription to one topic. Dropping it unsubscribes.
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next raw message, or `None` once the topic is closed.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// Backing transport: broadcast topics plus a durable key-value store.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Publish raw bytes to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to `topic`; messages published after this call are received.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>>;

    /// Durably set `key` to `value`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}
