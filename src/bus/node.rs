//! IpcNode - one addressable bus participant.
//!
//! Every node subscribes to the single shared topic and receives every
//! envelope published on it. Routing is client-side: the listener matches
//! each envelope's channel against the node's bound routes and invokes every
//! match.
//!
//! Blocking calls are emulated over the one-way broadcast: the caller
//! registers a waiter keyed by a unique response channel *before*
//! publishing, and the listener intercepts envelopes addressed to a pending
//! response channel before any route matching happens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::envelope::{BlockingReply, Envelope};
use crate::transport::{Subscription, Transport};
use crate::types::{BusConfig, Error, NodeId, Result};

use super::route::{CallData, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Constructed; `send` works but blocking calls need the listener.
    Idle,
    /// Listener running.
    Running,
    /// Stopped; the node is never reused.
    Stopped,
}

/// One bus participant. Cheap to clone; clones share the same node.
#[derive(Debug, Clone)]
pub struct IpcNode {
    inner: Arc<NodeInner>,
}

#[derive(Debug)]
struct NodeInner {
    id: NodeId,
    topic: String,
    default_blocking_timeout: Duration,
    transport: Arc<dyn Transport>,
    routes: RwLock<Vec<Arc<Route>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<BlockingReply>>>,
    state: Mutex<NodeState>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl IpcNode {
    pub fn new(id: NodeId, transport: Arc<dyn Transport>, cfg: &BusConfig) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id,
                topic: cfg.topic.clone(),
                default_blocking_timeout: cfg.default_blocking_timeout,
                transport,
                routes: RwLock::new(Vec::new()),
                pending: Mutex::new(HashMap::new()),
                state: Mutex::new(NodeState::Idle),
                cancel: CancellationToken::new(),
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.inner.id
    }

    pub fn default_blocking_timeout(&self) -> Duration {
        self.inner.default_blocking_timeout
    }

    /// Number of in-flight blocking calls issued by this node (diagnostic).
    pub async fn pending_calls(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Register routes on this node, binding each one.
    ///
    /// May be called several times before `start()`; several objects'
    /// routes can share one node.
    pub async fn bind_routes(&self, routes: Vec<Route>) -> Result<()> {
        if *self.inner.state.lock().await == NodeState::Stopped {
            return Err(Error::node_stopped(format!(
                "cannot bind routes on stopped node {}",
                self.inner.id
            )));
        }
        let mut bound = self.inner.routes.write().await;
        for mut route in routes {
            route.bind(self.inner.id.clone())?;
            bound.push(Arc::new(route));
        }
        Ok(())
    }

    /// Subscribe to the shared topic and spawn the listener loop.
    ///
    /// Returns only once the listener is running, so a `send` issued right
    /// after `start()` can be received by every started peer.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if *state != NodeState::Idle {
            return Err(Error::state_transition(format!(
                "node {} already started or stopped",
                self.inner.id
            )));
        }

        let subscription = self.inner.transport.subscribe(&self.inner.topic).await?;
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(listen(Arc::clone(&self.inner), subscription, ready_tx));
        ready_rx
            .await
            .map_err(|_| Error::transport(format!("listener of node {} died on startup", self.inner.id)))?;

        *self.inner.listener.lock().await = Some(handle);
        *state = NodeState::Running;
        Ok(())
    }

    /// Fire-and-forget publish. Returns as soon as the envelope is handed to
    /// the transport.
    pub async fn send(
        &self,
        channel: &str,
        payload: serde_json::Value,
        concurrency: Option<bool>,
        loopback: bool,
    ) -> Result<()> {
        self.ensure_not_stopped().await?;
        let envelope = Envelope::request(channel, self.inner.id.clone(), payload, concurrency, loopback);
        self.inner
            .transport
            .publish(&self.inner.topic, envelope.encode()?)
            .await
    }

    /// Blocking call: publish and await the handler's reply.
    ///
    /// The waiter is registered before publishing, so a reply can never
    /// arrive unobserved. On success the handler's value is returned, or its
    /// error re-raised as [`Error::Handler`]. On timeout the pending entry is
    /// removed and [`Error::Timeout`] raised.
    pub async fn send_blocking(
        &self,
        channel: &str,
        payload: serde_json::Value,
        concurrency: Option<bool>,
        loopback: bool,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        match *self.inner.state.lock().await {
            NodeState::Running => {}
            NodeState::Idle => {
                return Err(Error::node_stopped(format!(
                    "blocking call on node {} before start(); replies need the listener",
                    self.inner.id
                )))
            }
            NodeState::Stopped => {
                return Err(Error::node_stopped(format!(
                    "blocking call on stopped node {}",
                    self.inner.id
                )))
            }
        }

        let (envelope, response_channel) =
            Envelope::blocking_request(channel, self.inner.id.clone(), payload, concurrency, loopback);

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .await
            .insert(response_channel.clone(), tx);

        let published = match envelope.encode() {
            Ok(bytes) => self.inner.transport.publish(&self.inner.topic, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            self.inner.pending.lock().await.remove(&response_channel);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(BlockingReply::Ok(value))) => Ok(value),
            Ok(Ok(BlockingReply::Err(message))) => Err(Error::Handler(message)),
            Ok(Err(_)) => Err(Error::node_stopped(format!(
                "node {} stopped while awaiting reply on {channel:?}",
                self.inner.id
            ))),
            Err(_) => {
                // Clean up the orphaned waiter so the map does not leak.
                self.inner.pending.lock().await.remove(&response_channel);
                Err(Error::timeout(format!(
                    "no reply on {channel:?} within {timeout:?}"
                )))
            }
        }
    }

    /// Stop the listener and release the subscription. Single-shot; any
    /// `send` after this fails fast.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if *state != NodeState::Running {
                return Err(Error::state_transition(format!(
                    "stop() on node {} which is not running",
                    self.inner.id
                )));
            }
            *state = NodeState::Stopped;
        }

        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.listener.lock().await.take() {
            let _ = handle.await;
        }
        // Wake any outstanding blocking callers with a closed-channel error.
        self.inner.pending.lock().await.clear();
        tracing::debug!(node = %self.inner.id, "node stopped");
        Ok(())
    }

    async fn ensure_not_stopped(&self) -> Result<()> {
        if *self.inner.state.lock().await == NodeState::Stopped {
            return Err(Error::node_stopped(format!(
                "send on stopped node {}",
                self.inner.id
            )));
        }
        Ok(())
    }
}

/// Listener loop: one per node, runs until `stop()`.
async fn listen(
    inner: Arc<NodeInner>,
    mut subscription: Box<dyn Subscription>,
    ready: oneshot::Sender<()>,
) {
    let _ = ready.send(());
    tracing::debug!(node = %inner.id, "listener running");

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            message = subscription.recv() => match message {
                Some(bytes) => inner.deliver(&bytes).await,
                None => {
                    tracing::warn!(node = %inner.id, "shared topic closed, listener exiting");
                    break;
                }
            },
        }
    }

    tracing::debug!(node = %inner.id, "listener exited");
}

impl NodeInner {
    /// Handle one raw message from the shared topic.
    async fn deliver(self: &Arc<Self>, bytes: &[u8]) {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(node = %self.id, error = %e, "dropping malformed envelope");
                return;
            }
        };

        if envelope.sender == self.id && !envelope.loopback {
            return;
        }

        // Replies to our own blocking calls are intercepted before any route
        // matching: response channels are unique and never registered as
        // routes.
        if let Some(waiter) = self.pending.lock().await.remove(&envelope.channel) {
            let reply = serde_json::from_value(envelope.payload)
                .unwrap_or_else(|e| BlockingReply::Err(format!("malformed blocking reply: {e}")));
            // The waiter may have timed out and gone; nothing left to do then.
            let _ = waiter.send(reply);
            return;
        }

        let matched: Vec<Arc<Route>> = self
            .routes
            .read()
            .await
            .iter()
            .filter(|route| route.matches(&envelope.channel))
            .cloned()
            .collect();

        for route in matched {
            let concurrent = envelope.concurrency_override.unwrap_or(route.concurrent());
            if concurrent {
                let inner = Arc::clone(self);
                let envelope = envelope.clone();
                tokio::spawn(async move { inner.dispatch(&route, envelope).await });
            } else {
                // Inline on the listener: delivery of further messages to
                // this node waits for the handler. That is the ordering
                // guarantee non-concurrent routes rely on.
                self.dispatch(&route, envelope.clone()).await;
            }
        }
    }

    /// Run one handler and, for blocking requests, publish its reply.
    async fn dispatch(&self, route: &Route, envelope: Envelope) {
        let call = CallData {
            channel: envelope.channel.clone(),
            sender: envelope.sender.clone(),
            blocking: envelope.blocking_response_channel.is_some(),
        };
        let result = route.invoke(call, envelope.payload.clone()).await;

        if let Some(response_channel) = &envelope.blocking_response_channel {
            let reply = match result {
                Ok(value) => BlockingReply::Ok(value),
                Err(Error::Handler(message)) => BlockingReply::Err(message),
                Err(e) => BlockingReply::Err(e.to_string()),
            };
            // Loopback on a reply only matters when the caller is this same
            // node; leaving it off otherwise keeps the reply channel (which
            // embeds the request channel) out of our own wildcard routes.
            let loopback = envelope.sender == self.id;
            self.publish_reply(response_channel, reply, loopback).await;
        } else if let Err(e) = result {
            // One handler's failure never takes down the node.
            tracing::error!(
                node = %self.id,
                channel = %envelope.channel,
                sender = %envelope.sender,
                payload = %envelope.payload,
                error = %e,
                "handler failed on fire-and-forget delivery"
            );
        }
    }

    async fn publish_reply(&self, response_channel: &str, reply: BlockingReply, loopback: bool) {
        // A reply that cannot be serialized degrades to a null value; the
        // caller gets an answer either way.
        let payload = match serde_json::to_value(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(node = %self.id, error = %e, "blocking reply not serializable, sending null");
                serde_json::Value::Null
            }
        };
        let envelope = Envelope::request(response_channel, self.id.clone(), payload, None, loopback);
        let published = match envelope.encode() {
            Ok(bytes) => self.transport.publish(&self.topic, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            tracing::error!(
                node = %self.id,
                response_channel,
                error = %e,
                "failed to publish blocking reply"
            );
        }
    }
}
