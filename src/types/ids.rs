//! Strongly-typed identifiers.
//!
//! Node ids are validated at construction time: an empty id would make the
//! sender field of every envelope ambiguous, so it is rejected up front.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of one bus participant.
///
/// Components use their component name as their node id (one node per
/// process); anonymous clients get a random UUID-based id via [`NodeId::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh random node id.
    pub fn new() -> Self {
        Self(format!("node-{}", uuid::Uuid::new_v4()))
    }

    pub fn from_string(s: impl Into<String>) -> Result<Self, &'static str> {
        let s = s.into();
        if s.is_empty() {
            return Err("NodeId cannot be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
