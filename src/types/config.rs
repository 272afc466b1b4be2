//! Configuration structures.
//!
//! Every struct carries serde derives and a `Default` that matches the values
//! the fleet runs with in production; deployments override via a config file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bus node configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Supervisor configuration.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Bus node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Shared broadcast topic every node publishes and subscribes to.
    /// Routing is entirely client-side; there is exactly one topic.
    pub topic: String,

    /// Default timeout for blocking calls when the caller does not pick one.
    #[serde(with = "humantime_serde")]
    pub default_blocking_timeout: Duration,

    /// Per-subscriber buffer of the in-memory transport. Slow listeners past
    /// this depth lose the oldest messages (logged as a warning).
    pub broadcast_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            topic: "ipc".to_string(),
            default_blocking_timeout: Duration::from_secs(5),
            broadcast_capacity: 1024,
        }
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// How long a watchdog waits for a component's started/stopped broadcast
    /// before force-killing the process. Uniform across all components.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Managed components: name -> how to spawn the component's process.
    #[serde(default)]
    pub components: BTreeMap<String, ProcessSpec>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(15),
            components: BTreeMap::new(),
        }
    }
}

/// How to launch one component's process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Executable to run.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
