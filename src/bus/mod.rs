//! Message bus: route registration and the IPC node.
//!
//! Patterns supported:
//!   - **Fire-and-forget**: publish to a channel, every matching route on
//!     every node fires; handler errors are logged and swallowed.
//!   - **Blocking calls**: request/response emulated over the one-way
//!     broadcast via a unique ephemeral response channel.

mod node;
mod route;

pub use node::IpcNode;
pub use route::{CallData, HandlerResult, Route};
