//! Bus-forwarded logging.
//!
//! Fleet members log through an explicit [`BusLogger`] handed to them at
//! construction; there is no process-wide stream redirection. Each record is
//! published loopback on `log:<LEVEL>:<label>` so interested routes (a
//! ground-station forwarder subscribing to `log:ERROR:*`, for instance) can
//! pick it up, and mirrored to `tracing` for local output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bus::IpcNode;
use crate::envelope::channels;

/// Severity of one log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Uppercase level string as used in `log:<LEVEL>:<label>` channels.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One structured log record as carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub label: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Logger bound to one node and one label (usually the component name).
#[derive(Debug, Clone)]
pub struct BusLogger {
    node: IpcNode,
    label: String,
}

impl BusLogger {
    pub fn new(node: IpcNode, label: impl Into<String>) -> Self {
        Self {
            node,
            label: label.into(),
        }
    }

    /// Publish one record on `log:<LEVEL>:<label>[:<extra>]` and mirror it
    /// to tracing. Logging never fails the caller; a publish error is itself
    /// only traced.
    pub async fn log(&self, level: LogLevel, message: &str, extra: Option<&str>) {
        let record = LogRecord {
            label: self.label.clone(),
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        };

        match level {
            LogLevel::Debug => tracing::debug!(label = %self.label, "{message}"),
            LogLevel::Info => tracing::info!(label = %self.label, "{message}"),
            LogLevel::Warning => tracing::warn!(label = %self.label, "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(label = %self.label, level = %level, "{message}")
            }
        }

        let channel = channels::log_channel(level.as_str(), &self.label, extra);
        let payload = match serde_json::to_value(&record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "log record not serializable, dropping bus copy");
                return;
            }
        };
        if let Err(e) = self.node.send(&channel, payload, None, true).await {
            tracing::warn!(error = %e, channel, "failed to forward log record to bus");
        }
    }

    pub async fn debug(&self, message: &str, extra: Option<&str>) {
        self.log(LogLevel::Debug, message, extra).await;
    }

    pub async fn info(&self, message: &str, extra: Option<&str>) {
        self.log(LogLevel::Info, message, extra).await;
    }

    pub async fn warning(&self, message: &str, extra: Option<&str>) {
        self.log(LogLevel::Warning, message, extra).await;
    }

    pub async fn error(&self, message: &str, extra: Option<&str>) {
        self.log(LogLevel::Error, message, extra).await;
    }

    pub async fn critical(&self, message: &str, extra: Option<&str>) {
        self.log(LogLevel::Critical, message, extra).await;
    }
}
