//! Process launching abstraction.
//!
//! The supervisor drives component *processes*; how one is created is
//! deployment-specific (an OS process in production, an in-runtime task in
//! tests), so creation sits behind the [`Launcher`] trait.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tokio::process::{Child, Command};

use crate::types::{Error, ProcessSpec, Result};

/// Handle on one running component process.
#[async_trait]
pub trait ProcessHandle: Send + fmt::Debug {
    /// Force-terminate the process. Idempotent on an already-dead process.
    async fn kill(&mut self) -> Result<()>;

    /// True while the process has not exited.
    fn is_alive(&mut self) -> bool;
}

/// Creates component processes by name.
#[async_trait]
pub trait Launcher: Send + Sync + fmt::Debug {
    async fn spawn(&self, component: &str) -> Result<Box<dyn ProcessHandle>>;
}

/// Launcher spawning OS processes from configured argv specs.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    specs: BTreeMap<String, ProcessSpec>,
}

impl CommandLauncher {
    pub fn new(specs: BTreeMap<String, ProcessSpec>) -> Self {
        Self { specs }
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn spawn(&self, component: &str) -> Result<Box<dyn ProcessHandle>> {
        let spec = self.specs.get(component).ok_or_else(|| {
            Error::not_found(format!("no process spec for component {component:?}"))
        })?;
        let child = Command::new(&spec.command)
            .args(&spec.args)
            .kill_on_drop(true)
            .spawn()?;
        tracing::debug!(component, command = %spec.command, "spawned component process");
        Ok(Box::new(ChildHandle { child }))
    }
}

#[derive(Debug)]
struct ChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
