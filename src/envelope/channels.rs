//! Reserved channel names.
//!
//! The naming convention is shared by every component and the supervisor and
//! must be preserved bit-for-bit for interop with already-deployed fleet
//! members. `:` is the hierarchy separator; `*` in route patterns matches any
//! substring.

/// Durable store key holding a component's current lifecycle state string.
pub fn state_key(component: &str) -> String {
    format!("state:{component}")
}

/// Lifecycle broadcast channel for one component entering one state
/// (`starting`, `started`, `stopping`, `stopped`).
pub fn state_event(component: &str, state: &str) -> String {
    format!("state:{component}:{state}")
}

/// Supervisor -> component imperative to stop.
pub fn stop_channel(component: &str) -> String {
    format!("state:{component}:stop")
}

/// External -> supervisor command to start one component.
pub fn start_command(component: &str) -> String {
    format!("state:start:{component}")
}

/// External -> supervisor command to stop one component.
pub fn stop_command(component: &str) -> String {
    format!("state:stop:{component}")
}

/// External -> supervisor command to restart one component.
pub fn restart_command(component: &str) -> String {
    format!("state:restart:{component}")
}

/// External -> supervisor bulk commands.
pub const START_ALL: &str = "state:start_all";
pub const STOP_ALL: &str = "state:stop_all";
pub const RESTART_ALL: &str = "state:restart_all";

/// Route patterns the supervisor listens on for lifecycle confirmations.
pub const ANY_STARTED: &str = "state:*:started";
pub const ANY_STOPPED: &str = "state:*:stopped";

/// Log broadcast channel: `log:<LEVEL>:<label>` with an optional extra
/// suffix, e.g. `log:ERROR:propulsion:esc`.
pub fn log_channel(level: &str, label: &str, extra: Option<&str>) -> String {
    match extra {
        Some(extra) => format!("log:{level}:{label}:{extra}"),
        None => format!("log:{level}:{label}"),
    }
}
