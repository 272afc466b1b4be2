//! Supervisor - the privileged node owning component process lifecycles.
//!
//! One record per managed component: the process handle, an async mutex
//! serializing start/stop/restart, and a handshake gate. The gate is a
//! single-slot rendezvous (`oneshot`): the watchdog installs a sender before
//! issuing a start/stop and waits on the receiver; the broadcast listener
//! fires it when the component's own `started`/`stopped` event arrives. If
//! nothing fires within `stop_timeout`, the watchdog force-kills the
//! process, force-writes the `stopped` state, and publishes the stopped
//! broadcast anyway so no other waiter stays stuck.
//!
//! Exposed bus routes: `state:start:<name>`, `state:stop:<name>`,
//! `state:restart:<name>`, `state:start_all`, `state:stop_all`,
//! `state:restart_all` (payload `{"component": <name>}` for the per-name
//! commands).

use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::bus::{IpcNode, Route};
use crate::component::{self, ComponentState};
use crate::envelope::channels;
use crate::logging::BusLogger;
use crate::transport::Transport;
use crate::types::{BusConfig, Config, Error, NodeId, Result, SupervisorConfig};

mod launcher;

pub use launcher::{CommandLauncher, Launcher, ProcessHandle};

/// Per-component supervision record.
struct Managed {
    /// Serializes start/stop/restart for this component.
    start_stop_lock: Mutex<()>,
    /// Handle of the last spawned process, if any.
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    /// Single-slot rendezvous released by the broadcast listener.
    handshake: Mutex<Option<oneshot::Sender<()>>>,
}

/// Privileged node spawning, stopping, and force-terminating component
/// processes based on lifecycle broadcasts and timeouts.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    node: IpcNode,
    transport: Arc<dyn Transport>,
    launcher: Arc<dyn Launcher>,
    stop_timeout: Duration,
    managed: HashMap<String, Arc<Managed>>,
    logger: BusLogger,
}

impl Supervisor {
    /// Build a supervisor for `components`, seed their durable state keys,
    /// bind all routes, and start listening.
    pub async fn new(
        transport: Arc<dyn Transport>,
        launcher: Arc<dyn Launcher>,
        bus_cfg: &BusConfig,
        stop_timeout: Duration,
        components: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let id = NodeId::from_string("supervisor").map_err(Error::route_binding)?;
        let node = IpcNode::new(id, Arc::clone(&transport), bus_cfg);
        let logger = BusLogger::new(node.clone(), "supervisor");

        let mut managed = HashMap::new();
        for name in components {
            component::init_state(&transport, &name).await?;
            managed.insert(
                name,
                Arc::new(Managed {
                    start_stop_lock: Mutex::new(()),
                    process: Mutex::new(None),
                    handshake: Mutex::new(None),
                }),
            );
        }

        let inner = Arc::new(SupervisorInner {
            node: node.clone(),
            transport,
            launcher,
            stop_timeout,
            managed,
            logger,
        });

        node.bind_routes(Self::routes(&inner)?).await?;
        node.start().await?;
        Ok(Self { inner })
    }

    /// Build from configuration, spawning OS processes per the configured
    /// specs.
    pub async fn from_config(transport: Arc<dyn Transport>, cfg: &Config) -> Result<Self> {
        let SupervisorConfig {
            stop_timeout,
            components,
        } = cfg.supervisor.clone();
        let names: Vec<String> = components.keys().cloned().collect();
        let launcher = Arc::new(CommandLauncher::new(components));
        Self::new(transport, launcher, &cfg.bus, stop_timeout, names).await
    }

    fn routes(inner: &Arc<SupervisorInner>) -> Result<Vec<Route>> {
        let mut routes = Vec::new();

        // Lifecycle confirmations release the matching handshake gate.
        // Non-concurrent: releases are cheap and must stay in delivery order.
        let listener = Arc::clone(inner);
        routes.push(Route::new(
            &[channels::ANY_STARTED, channels::ANY_STOPPED],
            false,
            move |_call, payload| {
                let inner = Arc::clone(&listener);
                async move {
                    let name = component_field(&payload)?;
                    inner.release_handshake(&name).await;
                    Ok(serde_json::Value::Null)
                }
            },
        )?);

        // Commands run concurrently: a watchdog waiting out its timeout must
        // never stall the listener that releases the gates.
        let start = Arc::clone(inner);
        routes.push(Route::new(
            &[channels::start_command("*").as_str()],
            true,
            move |_call, payload| {
                let inner = Arc::clone(&start);
                async move {
                    inner.start_component(&component_field(&payload)?).await?;
                    Ok(serde_json::Value::Null)
                }
            },
        )?);

        let stop = Arc::clone(inner);
        routes.push(Route::new(
            &[channels::stop_command("*").as_str()],
            true,
            move |_call, payload| {
                let inner = Arc::clone(&stop);
                async move {
                    inner.stop_component(&component_field(&payload)?).await?;
                    Ok(serde_json::Value::Null)
                }
            },
        )?);

        let restart = Arc::clone(inner);
        routes.push(Route::new(
            &[channels::restart_command("*").as_str()],
            true,
            move |_call, payload| {
                let inner = Arc::clone(&restart);
                async move {
                    inner.restart_component(&component_field(&payload)?).await?;
                    Ok(serde_json::Value::Null)
                }
            },
        )?);

        let start_all = Arc::clone(inner);
        routes.push(Route::new(&[channels::START_ALL], true, move |_call, _payload| {
            let inner = Arc::clone(&start_all);
            async move {
                inner.for_each_component(Op::Start).await;
                Ok(serde_json::Value::Null)
            }
        })?);

        let stop_all = Arc::clone(inner);
        routes.push(Route::new(&[channels::STOP_ALL], true, move |_call, _payload| {
            let inner = Arc::clone(&stop_all);
            async move {
                inner.for_each_component(Op::Stop).await;
                Ok(serde_json::Value::Null)
            }
        })?);

        let restart_all = Arc::clone(inner);
        routes.push(Route::new(&[channels::RESTART_ALL], true, move |_call, _payload| {
            let inner = Arc::clone(&restart_all);
            async move {
                inner.for_each_component(Op::Restart).await;
                Ok(serde_json::Value::Null)
            }
        })?);

        Ok(routes)
    }

    /// Start one component (idempotent if it is not stopped).
    pub async fn start_component(&self, name: &str) -> Result<()> {
        self.inner.start_component(name).await
    }

    /// Stop one component (idempotent if it is not started).
    pub async fn stop_component(&self, name: &str) -> Result<()> {
        self.inner.stop_component(name).await
    }

    /// Stop then start one component, each phase with its own watchdog.
    pub async fn restart_component(&self, name: &str) -> Result<()> {
        self.inner.restart_component(name).await
    }

    pub async fn start_all(&self) {
        self.inner.for_each_component(Op::Start).await;
    }

    pub async fn stop_all(&self) {
        self.inner.for_each_component(Op::Stop).await;
    }

    pub async fn restart_all(&self) {
        self.inner.for_each_component(Op::Restart).await;
    }

    /// Durable lifecycle state of one managed component.
    pub async fn state(&self, name: &str) -> Result<ComponentState> {
        self.inner.get_state(name).await
    }

    /// True while the component's last spawned process is running
    /// (diagnostic).
    pub async fn process_alive(&self, name: &str) -> Result<bool> {
        let managed = self.inner.record(name)?;
        let mut process = managed.process.lock().await;
        Ok(process.as_mut().map(|p| p.is_alive()).unwrap_or(false))
    }

    /// The supervisor's own bus node.
    pub fn node(&self) -> &IpcNode {
        &self.inner.node
    }

    /// Stop every component, then the supervisor's own node.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.for_each_component(Op::Stop).await;
        self.inner.node.stop().await
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("components", &self.inner.managed.keys().collect::<Vec<_>>())
            .field("stop_timeout", &self.inner.stop_timeout)
            .finish_non_exhaustive()
    }
}

/// Which lifecycle operation a bulk fan-out applies.
#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Restart,
}

impl SupervisorInner {
    fn record(&self, name: &str) -> Result<&Arc<Managed>> {
        self.managed
            .get(name)
            .ok_or_else(|| Error::not_found(format!("unmanaged component {name:?}")))
    }

    async fn get_state(&self, name: &str) -> Result<ComponentState> {
        self.record(name)?;
        match self.transport.get(&channels::state_key(name)).await? {
            Some(raw) => raw.parse(),
            // Keys are seeded at construction; an absent key means a fresh
            // store, which is equivalent to stopped.
            None => Ok(ComponentState::Stopped),
        }
    }

    async fn release_handshake(&self, name: &str) {
        if let Some(managed) = self.managed.get(name) {
            if let Some(gate) = managed.handshake.lock().await.take() {
                // The watchdog may have timed out and gone; that is fine.
                let _ = gate.send(());
            }
        }
    }

    /// Install a fresh rendezvous gate, returning the waiting end.
    async fn install_handshake(&self, name: &str, managed: &Managed) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if managed.handshake.lock().await.replace(tx).is_some() {
            // Only reachable if a previous watchdog died without cleanup.
            tracing::warn!(component = name, "replacing stale handshake gate");
        }
        rx
    }

    async fn start_component(&self, name: &str) -> Result<()> {
        let managed = Arc::clone(self.record(name)?);
        let _guard = managed.start_stop_lock.lock().await;

        let state = self.get_state(name).await?;
        if state != ComponentState::Stopped {
            tracing::debug!(component = name, %state, "start requested but component is not stopped");
            return Ok(());
        }

        let gate = self.install_handshake(name, &managed).await;
        let process = self.launcher.spawn(name).await?;
        *managed.process.lock().await = Some(process);

        self.await_confirmation(name, &managed, gate, ComponentState::Started)
            .await
    }

    async fn stop_component(&self, name: &str) -> Result<()> {
        let managed = Arc::clone(self.record(name)?);
        let _guard = managed.start_stop_lock.lock().await;

        let state = self.get_state(name).await?;
        if state != ComponentState::Started {
            tracing::debug!(component = name, %state, "stop requested but component is not started");
            return Ok(());
        }

        let gate = self.install_handshake(name, &managed).await;
        self.node
            .send(&channels::stop_channel(name), json!({ "component": name }), None, false)
            .await?;

        self.await_confirmation(name, &managed, gate, ComponentState::Stopped)
            .await
    }

    async fn restart_component(&self, name: &str) -> Result<()> {
        match self.stop_component(name).await {
            Ok(()) => {}
            Err(e @ Error::NotFound(_)) => return Err(e),
            // A stop-phase watchdog already forced the stopped state; the
            // start phase can proceed.
            Err(e) => {
                tracing::warn!(component = name, error = %e, "stop phase of restart failed, starting anyway")
            }
        }
        self.start_component(name).await
    }

    /// Watchdog: wait for the gate up to `stop_timeout`; on timeout kill the
    /// process, force the terminal state, and publish the stopped broadcast
    /// so no other waiter stays stuck.
    async fn await_confirmation(
        &self,
        name: &str,
        managed: &Managed,
        gate: oneshot::Receiver<()>,
        waiting_for: ComponentState,
    ) -> Result<()> {
        match tokio::time::timeout(self.stop_timeout, gate).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::watchdog_timeout(format!(
                "handshake gate for {name:?} was abandoned"
            ))),
            Err(_) => {
                managed.handshake.lock().await.take();

                if let Some(mut process) = managed.process.lock().await.take() {
                    if let Err(e) = process.kill().await {
                        tracing::warn!(component = name, error = %e, "failed to kill unresponsive process");
                    }
                }

                let stuck_in = self
                    .get_state(name)
                    .await
                    .map(|s| s.as_str())
                    .unwrap_or("unknown");
                if let Err(e) = self
                    .transport
                    .set(&channels::state_key(name), ComponentState::Stopped.as_str())
                    .await
                {
                    tracing::error!(component = name, error = %e, "failed to force stopped state");
                }
                if let Err(e) = self
                    .node
                    .send(
                        &channels::state_event(name, ComponentState::Stopped.as_str()),
                        json!({ "component": name }),
                        None,
                        true,
                    )
                    .await
                {
                    tracing::error!(component = name, error = %e, "failed to publish forced stopped event");
                }

                self.logger
                    .error(
                        &format!(
                            "timeout waiting for {name} to reach {waiting_for} (still {stuck_in}), \
                             process killed and state forced to stopped"
                        ),
                        None,
                    )
                    .await;

                Err(Error::watchdog_timeout(format!(
                    "component {name:?} did not reach {waiting_for} within {:?}",
                    self.stop_timeout
                )))
            }
        }
    }

    /// Fan one operation out to every managed component, one worker each,
    /// and join them all. Failures and timeouts stay per-component.
    async fn for_each_component(self: &Arc<Self>, op: Op) {
        let workers: Vec<_> = self
            .managed
            .keys()
            .cloned()
            .map(|name| {
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = match op {
                        Op::Start => inner.start_component(&name).await,
                        Op::Stop => inner.stop_component(&name).await,
                        Op::Restart => inner.restart_component(&name).await,
                    };
                    if let Err(e) = outcome {
                        tracing::error!(component = %name, ?op, error = %e, "bulk operation failed for component");
                    }
                })
            })
            .collect();
        futures::future::join_all(workers).await;
    }
}

/// Extract the target component name from a command payload.
fn component_field(payload: &serde_json::Value) -> Result<String> {
    payload
        .get("component")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::parse("command payload missing \"component\" field"))
}
