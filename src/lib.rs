//! # Skybus - Fleet IPC Bus and Component Supervisor
//!
//! Communication and process-supervision substrate for a fleet of
//! independent drone-control microservices:
//! - Inter-process message bus with glob-routed dispatch over one shared
//!   broadcast topic (routing is entirely client-side)
//! - Emulated blocking RPC over ephemeral response channels
//! - Component lifecycle state machine (stopped/starting/started/stopping)
//!   mirrored to a durable store and broadcast as bus events
//! - Supervisor driving component processes with per-component locks,
//!   handshake gates, and force-kill watchdogs
//!
//! ## Architecture
//!
//! ```text
//!             one shared broadcast topic ("ipc")
//!   ┌──────────────────────┬──────────────────────┐
//!   │                      │                      │
//! ┌─┴────────┐        ┌────┴─────┐         ┌──────┴─────┐
//! │ IpcNode  │        │ IpcNode  │         │ Supervisor │
//! │ (rc)     │        │ (servos) │         │  node      │
//! │ routes…  │        │ routes…  │         │ watchdogs… │
//! └──────────┘        └──────────┘         └────────────┘
//! ```
//!
//! Every node receives every envelope and matches it against its own routes;
//! a `Component` is a node plus the lifecycle wrapper; the `Supervisor` is a
//! privileged node that owns one record per managed component.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bus;
pub mod component;
pub mod envelope;
pub mod logging;
pub mod supervisor;
pub mod transport;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
