//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the skybus crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope bytes. The listener logs and drops the message;
    /// the node keeps running.
    #[error("parse error: {0}")]
    Parse(String),

    /// A route was invoked before binding, bound twice, or registered with an
    /// invalid pattern set. Raised at registration time, fatal to startup.
    #[error("route binding error: {0}")]
    RouteBinding(String),

    /// An error raised inside a handler, re-surfaced to the blocking caller.
    #[error("handler error: {0}")]
    Handler(String),

    /// A blocking call exceeded its timeout without receiving a response.
    #[error("ipc timeout: {0}")]
    Timeout(String),

    /// Lifecycle transition attempted from the wrong current state.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A supervised component did not confirm a start/stop in time; its
    /// process was force-killed and its state force-written.
    #[error("watchdog timeout: {0}")]
    WatchdogTimeout(String),

    /// The node was used after `stop()`, or a blocking call was issued
    /// without a running listener.
    #[error("node stopped: {0}")]
    NodeStopped(String),

    /// Unknown component or missing record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure (publish, subscribe, or store access).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors (process spawn and kill paths).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn route_binding(msg: impl Into<String>) -> Self {
        Self::RouteBinding(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn watchdog_timeout(msg: impl Into<String>) -> Self {
        Self::WatchdogTimeout(msg.into())
    }

    pub fn node_stopped(msg: impl Into<String>) -> Self {
        Self::NodeStopped(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
