//! Component lifecycle.
//!
//! A component is one microservice process: exactly one [`IpcNode`] plus the
//! STOPPED -> STARTING -> STARTED -> STOPPING -> STOPPED state machine. The
//! transition order is total: no skips, no reverse. A transition attempted
//! from the wrong state is a defect in the component or its supervisor, not
//! a runtime condition to recover from, and surfaces as
//! [`Error::StateTransition`].
//!
//! Every transition is written to the durable store at `state:<name>` and
//! broadcast on `state:<name>:<new_state>` so the supervisor (and anyone
//! else) can observe it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;

use crate::bus::{IpcNode, Route};
use crate::envelope::channels;
use crate::logging::BusLogger;
use crate::transport::Transport;
use crate::types::{BusConfig, Error, NodeId, Result};

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl ComponentState {
    /// Lowercase state string as stored durably and used in channel names.
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentState::Stopped => "stopped",
            ComponentState::Starting => "starting",
            ComponentState::Started => "started",
            ComponentState::Stopping => "stopping",
        }
    }

    /// Check if transition is valid. The lifecycle is a strict cycle.
    pub fn can_transition_to(self, to: ComponentState) -> bool {
        matches!(
            (self, to),
            (ComponentState::Stopped, ComponentState::Starting)
                | (ComponentState::Starting, ComponentState::Started)
                | (ComponentState::Started, ComponentState::Stopping)
                | (ComponentState::Stopping, ComponentState::Stopped)
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ComponentState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stopped" => Ok(ComponentState::Stopped),
            "starting" => Ok(ComponentState::Starting),
            "started" => Ok(ComponentState::Started),
            "stopping" => Ok(ComponentState::Stopping),
            other => Err(Error::parse(format!("unknown component state {other:?}"))),
        }
    }
}

/// User-supplied component behavior.
///
/// Implementations get the component's node for publishing; routes returned
/// by [`routes`](Component::routes) are bound to that node before `start`
/// ever runs.
#[async_trait]
pub trait Component: Send + Sync {
    /// Component name; doubles as the node id and the key in every reserved
    /// channel name.
    fn name(&self) -> &str;

    /// Routes to register on the component's node.
    fn routes(&self, node: &IpcNode) -> Vec<Route> {
        let _ = node;
        Vec::new()
    }

    /// Bring the component up. Must not issue a blocking loopback call to
    /// one of this component's own non-concurrent routes (the listener is
    /// busy delivering elsewhere and the call would deadlock).
    async fn start(&self, node: &IpcNode) -> Result<()>;

    /// Tear the component down.
    async fn stop(&self, node: &IpcNode) -> Result<()>;
}

/// Seed the durable state key for `name` to `stopped` if it has none yet.
/// Called by the supervisor at boot for every managed component.
pub async fn init_state(transport: &Arc<dyn Transport>, name: &str) -> Result<()> {
    let key = channels::state_key(name);
    if transport.get(&key).await?.is_none() {
        transport.set(&key, ComponentState::Stopped.as_str()).await?;
    }
    Ok(())
}

/// Runtime wrapper tying one [`Component`] to one [`IpcNode`] and driving
/// the state machine.
///
/// The host wires `state:<name>:stop` as a concurrent route: a component is
/// never stopped by direct call, only by that bus message, and its node
/// unsubscribes itself only after reaching the terminal state.
#[derive(Clone)]
pub struct ComponentHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    name: String,
    node: IpcNode,
    transport: Arc<dyn Transport>,
    component: Arc<dyn Component>,
    logger: BusLogger,
    state: watch::Sender<ComponentState>,
}

impl ComponentHost {
    /// Build the host: create the node, bind the component's routes plus the
    /// reserved stop route, and start listening. The component itself stays
    /// `Stopped` until [`start_component`](Self::start_component).
    pub async fn new(
        component: Arc<dyn Component>,
        transport: Arc<dyn Transport>,
        cfg: &BusConfig,
    ) -> Result<Self> {
        let name = component.name().to_string();
        let id = NodeId::from_string(name.clone()).map_err(Error::route_binding)?;
        let node = IpcNode::new(id, Arc::clone(&transport), cfg);
        let logger = BusLogger::new(node.clone(), name.clone());

        let (state, _) = watch::channel(ComponentState::Stopped);
        let inner = Arc::new(HostInner {
            name: name.clone(),
            node: node.clone(),
            transport,
            component: Arc::clone(&component),
            logger,
            state,
        });

        let mut routes = component.routes(&node);
        let stop_target = Arc::clone(&inner);
        // Concurrent: the stop path tears the node down and must not run
        // inline on the listener it is about to join.
        routes.push(Route::new(
            &[channels::stop_channel(&name).as_str()],
            true,
            move |_call, _payload| {
                let inner = Arc::clone(&stop_target);
                async move {
                    inner.stop_component().await?;
                    Ok(serde_json::Value::Null)
                }
            },
        )?);

        inner.node.bind_routes(routes).await?;
        inner.node.start().await?;

        Ok(Self { inner })
    }

    /// Drive the component from `Stopped` through `Starting` to `Started`.
    pub async fn start_component(&self) -> Result<()> {
        self.inner.transition(ComponentState::Starting).await?;
        if let Err(e) = self.inner.component.start(&self.inner.node).await {
            self.inner
                .logger
                .critical(&format!("component failed to start: {e}"), None)
                .await;
            return Err(e);
        }
        self.inner.transition(ComponentState::Started).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        *self.inner.state.borrow()
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The component's bus node.
    pub fn node(&self) -> &IpcNode {
        &self.inner.node
    }

    /// Park until the component reaches `Stopped` (its terminal state).
    pub async fn wait_stopped(&self) {
        let mut rx = self.inner.state.subscribe();
        while *rx.borrow() != ComponentState::Stopped {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for ComponentHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHost")
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl HostInner {
    /// Apply one lifecycle transition: validate, write the durable key,
    /// broadcast the event, update local state.
    async fn transition(&self, to: ComponentState) -> Result<()> {
        let from = *self.state.borrow();
        if !from.can_transition_to(to) {
            return Err(Error::state_transition(format!(
                "component {} cannot transition {from} -> {to}",
                self.name
            )));
        }

        // Durable write first: whoever reacts to the broadcast must not read
        // a stale store.
        self.transport
            .set(&channels::state_key(&self.name), to.as_str())
            .await?;
        self.node
            .send(
                &channels::state_event(&self.name, to.as_str()),
                json!({ "component": self.name }),
                None,
                true,
            )
            .await?;
        self.state.send_replace(to);
        self.logger
            .info(&format!("component is {to}"), Some("state"))
            .await;
        Ok(())
    }

    /// Stop path, triggered by the reserved stop route.
    async fn stop_component(&self) -> Result<()> {
        self.transition(ComponentState::Stopping).await?;
        if let Err(e) = self.component.stop(&self.node).await {
            self.logger
                .critical(&format!("component failed to stop: {e}"), None)
                .await;
            return Err(e);
        }
        self.transition(ComponentState::Stopped).await?;
        // Unsubscribe only after the terminal state is published.
        self.node.stop().await
    }
}

/// Entry point for a component process: host the component, start it, and
/// return once it has been stopped over the bus.
pub async fn run_component(
    component: Arc<dyn Component>,
    transport: Arc<dyn Transport>,
    cfg: &BusConfig,
) -> Result<()> {
    let host = ComponentHost::new(component, transport, cfg).await?;
    host.start_component().await?;
    host.wait_stopped().await;
    Ok(())
}
