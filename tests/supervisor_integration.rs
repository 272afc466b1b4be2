//! Supervisor integration — watchdogs, idempotency, and bulk operations.
//!
//! Component "processes" run as tokio tasks via a test launcher; killing a
//! process aborts its task. The bus and durable store are the in-memory
//! transport, exactly as a single-machine deployment would wire them.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use skybus::bus::IpcNode;
use skybus::component::{self, Component, ComponentState};
use skybus::supervisor::{Launcher, ProcessHandle, Supervisor};
use skybus::transport::{InMemoryTransport, Transport};
use skybus::types::{BusConfig, Error, NodeId, Result};

const WATCHDOG: Duration = Duration::from_millis(500);

// --- Test components -------------------------------------------------------

struct BasicComponent {
    name: &'static str,
}

#[async_trait]
impl Component for BasicComponent {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(&self, _node: &IpcNode) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _node: &IpcNode) -> Result<()> {
        Ok(())
    }
}

struct NeverStartComponent;

#[async_trait]
impl Component for NeverStartComponent {
    fn name(&self) -> &str {
        "never_start"
    }

    async fn start(&self, _node: &IpcNode) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn stop(&self, _node: &IpcNode) -> Result<()> {
        Ok(())
    }
}

struct NeverStopComponent;

#[async_trait]
impl Component for NeverStopComponent {
    fn name(&self) -> &str {
        "never_stop"
    }

    async fn start(&self, _node: &IpcNode) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _node: &IpcNode) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

// --- Task-based launcher ----------------------------------------------------

/// Runs each component as a tokio task; `kill` aborts the task, mirroring a
/// force-killed process.
struct TaskLauncher {
    transport: Arc<InMemoryTransport>,
    bus: BusConfig,
    factories: HashMap<String, Arc<dyn Fn() -> Arc<dyn Component> + Send + Sync>>,
    spawn_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl std::fmt::Debug for TaskLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLauncher")
            .field("components", &self.factories.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TaskLauncher {
    fn new(transport: Arc<InMemoryTransport>) -> Self {
        Self {
            transport,
            bus: BusConfig::default(),
            factories: HashMap::new(),
            spawn_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn register<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Component> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
        self
    }

    fn spawn_count(&self, name: &str) -> usize {
        *self.spawn_counts.lock().unwrap().get(name).unwrap_or(&0)
    }
}

#[async_trait]
impl Launcher for TaskLauncher {
    async fn spawn(&self, name: &str) -> Result<Box<dyn ProcessHandle>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::not_found(format!("no component registered as {name:?}")))?;
        *self
            .spawn_counts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert(0) += 1;

        let component = factory();
        let transport = Arc::clone(&self.transport) as Arc<dyn Transport>;
        let bus = self.bus.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = component::run_component(component, transport, &bus).await {
                tracing::debug!(error = %e, "component task ended with error");
            }
        });
        Ok(Box::new(TaskHandle { task }))
    }
}

#[derive(Debug)]
struct TaskHandle {
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl ProcessHandle for TaskHandle {
    async fn kill(&mut self) -> Result<()> {
        self.task.abort();
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.task.is_finished()
    }
}

// --- Harness ----------------------------------------------------------------

struct Fleet {
    transport: Arc<InMemoryTransport>,
    launcher: Arc<TaskLauncher>,
    supervisor: Supervisor,
}

async fn fleet(launcher: TaskLauncher) -> Fleet {
    let transport = Arc::clone(&launcher.transport);
    let launcher = Arc::new(launcher);
    let names: Vec<String> = launcher.factories.keys().cloned().collect();
    let supervisor = Supervisor::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        Arc::clone(&launcher) as Arc<dyn Launcher>,
        &BusConfig::default(),
        WATCHDOG,
        names,
    )
    .await
    .unwrap();
    Fleet {
        transport,
        launcher,
        supervisor,
    }
}

fn basic_fleet(transport: &Arc<InMemoryTransport>) -> TaskLauncher {
    TaskLauncher::new(Arc::clone(transport))
        .register("basic", || Arc::new(BasicComponent { name: "basic" }))
        .register("also_basic", || Arc::new(BasicComponent { name: "also_basic" }))
}

/// A client node for issuing supervisor commands over the bus.
async fn client(transport: &Arc<InMemoryTransport>) -> IpcNode {
    let node = IpcNode::new(
        NodeId::from_string("ground-station").unwrap(),
        Arc::clone(transport) as Arc<dyn Transport>,
        &BusConfig::default(),
    );
    node.start().await.unwrap();
    node
}

// --- Tests ------------------------------------------------------------------

#[tokio::test]
async fn start_then_stop_one_component() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;

    fleet.supervisor.start_component("basic").await.unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
    assert!(fleet.supervisor.process_alive("basic").await.unwrap());
    assert_eq!(
        fleet.transport.get("state:basic").await.unwrap().as_deref(),
        Some("started")
    );

    fleet.supervisor.stop_component("basic").await.unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Stopped);
}

#[tokio::test]
async fn commands_arrive_over_the_bus() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;
    let ground = client(&transport).await;

    ground
        .send_blocking(
            "state:start:basic",
            json!({"component": "basic"}),
            None,
            false,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);

    ground
        .send_blocking(
            "state:stop:basic",
            json!({"component": "basic"}),
            None,
            false,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Stopped);
}

#[tokio::test]
async fn starting_a_started_component_is_a_no_op() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;

    fleet.supervisor.start_component("basic").await.unwrap();
    assert_eq!(fleet.launcher.spawn_count("basic"), 1);

    // Durable state is STARTED: no new process, state unchanged.
    fleet.supervisor.start_component("basic").await.unwrap();
    assert_eq!(fleet.launcher.spawn_count("basic"), 1);
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
}

#[tokio::test]
async fn unknown_component_command_fails() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;
    let ground = client(&transport).await;

    let err = fleet.supervisor.start_component("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = ground
        .send_blocking(
            "state:start:ghost",
            json!({"component": "ghost"}),
            None,
            false,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    match err {
        Error::Handler(message) => assert!(message.contains("not found")),
        other => panic!("expected handler error, got {other}"),
    }
}

#[tokio::test]
async fn watchdog_kills_a_component_that_never_finishes_starting() {
    let transport = Arc::new(InMemoryTransport::default());
    let launcher = TaskLauncher::new(Arc::clone(&transport))
        .register("never_start", || Arc::new(NeverStartComponent));
    let fleet = fleet(launcher).await;

    let started = Instant::now();
    let err = fleet.supervisor.start_component("never_start").await.unwrap_err();
    assert!(matches!(err, Error::WatchdogTimeout(_)));
    assert!(started.elapsed() >= WATCHDOG);

    assert_eq!(
        fleet.supervisor.state("never_start").await.unwrap(),
        ComponentState::Stopped
    );
    assert!(!fleet.supervisor.process_alive("never_start").await.unwrap());
}

#[tokio::test]
async fn watchdog_kills_a_component_that_never_finishes_stopping() {
    let transport = Arc::new(InMemoryTransport::default());
    let launcher = TaskLauncher::new(Arc::clone(&transport))
        .register("never_stop", || Arc::new(NeverStopComponent));
    let fleet = fleet(launcher).await;

    fleet.supervisor.start_component("never_stop").await.unwrap();
    assert_eq!(
        fleet.supervisor.state("never_stop").await.unwrap(),
        ComponentState::Started
    );

    let err = fleet.supervisor.stop_component("never_stop").await.unwrap_err();
    assert!(matches!(err, Error::WatchdogTimeout(_)));
    assert_eq!(
        fleet.supervisor.state("never_stop").await.unwrap(),
        ComponentState::Stopped
    );
    assert!(!fleet.supervisor.process_alive("never_stop").await.unwrap());
}

#[tokio::test]
async fn restart_spawns_a_fresh_process() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;

    fleet.supervisor.start_component("basic").await.unwrap();
    fleet.supervisor.restart_component("basic").await.unwrap();

    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
    assert_eq!(fleet.launcher.spawn_count("basic"), 2);
}

#[tokio::test]
async fn bulk_operations_cover_every_component() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;
    let ground = client(&transport).await;

    ground
        .send_blocking("state:start_all", json!({}), None, false, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
    assert_eq!(
        fleet.supervisor.state("also_basic").await.unwrap(),
        ComponentState::Started
    );

    ground
        .send_blocking("state:stop_all", json!({}), None, false, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Stopped);
    assert_eq!(
        fleet.supervisor.state("also_basic").await.unwrap(),
        ComponentState::Stopped
    );

    // Restart while both are running: both end up started on a new process.
    ground
        .send_blocking("state:start_all", json!({}), None, false, Duration::from_secs(10))
        .await
        .unwrap();
    let before = (fleet.launcher.spawn_count("basic"), fleet.launcher.spawn_count("also_basic"));

    ground
        .send_blocking("state:restart_all", json!({}), None, false, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
    assert_eq!(
        fleet.supervisor.state("also_basic").await.unwrap(),
        ComponentState::Started
    );
    assert_eq!(fleet.launcher.spawn_count("basic"), before.0 + 1);
    assert_eq!(fleet.launcher.spawn_count("also_basic"), before.1 + 1);
    assert!(fleet.supervisor.process_alive("basic").await.unwrap());
    assert!(fleet.supervisor.process_alive("also_basic").await.unwrap());
}

#[tokio::test]
async fn watchdog_failures_do_not_abort_sibling_bulk_operations() {
    let transport = Arc::new(InMemoryTransport::default());
    let launcher = TaskLauncher::new(Arc::clone(&transport))
        .register("basic", || Arc::new(BasicComponent { name: "basic" }))
        .register("never_start", || Arc::new(NeverStartComponent));
    let fleet = fleet(launcher).await;

    fleet.supervisor.start_all().await;

    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Started);
    assert_eq!(
        fleet.supervisor.state("never_start").await.unwrap(),
        ComponentState::Stopped
    );
    assert!(!fleet.supervisor.process_alive("never_start").await.unwrap());
}

#[tokio::test]
async fn shutdown_stops_components_and_the_supervisor_node() {
    let transport = Arc::new(InMemoryTransport::default());
    let fleet = fleet(basic_fleet(&transport)).await;

    fleet.supervisor.start_all().await;
    fleet.supervisor.shutdown().await.unwrap();

    assert_eq!(fleet.supervisor.state("basic").await.unwrap(), ComponentState::Stopped);
    assert_eq!(
        fleet.supervisor.state("also_basic").await.unwrap(),
        ComponentState::Stopped
    );
}
