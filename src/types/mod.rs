//! Core types for the skybus crate.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed node identifiers
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for bus, supervisor, observability

mod config;
mod errors;
mod ids;

pub use config::{BusConfig, Config, ObservabilityConfig, ProcessSpec, SupervisorConfig};
pub use errors::{Error, Result};
pub use ids::NodeId;
