//! Route - a pattern-matched handler registration.
//!
//! Routes are built explicitly at construction time and handed to
//! [`IpcNode::bind_routes`](crate::bus::IpcNode::bind_routes); there is no
//! attribute scanning. Each glob pattern (`*` = any substring, everything
//! else literal) is compiled once into an anchored regex.

use regex::Regex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::{Error, NodeId, Result};

/// Context handed to a handler for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct CallData {
    /// Channel the triggering envelope was addressed to (the concrete
    /// channel, not the pattern that matched it).
    pub channel: String,

    /// Node that published the envelope.
    pub sender: NodeId,

    /// True when the delivery is a blocking request and the return value
    /// will be sent back to the caller.
    pub blocking: bool,
}

/// Handler return value; for fire-and-forget deliveries it is discarded.
pub type HandlerResult = Result<serde_json::Value>;

type BoxedHandler =
    Arc<dyn Fn(CallData, serde_json::Value) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// A registered handler with its patterns and dispatch policy.
pub struct Route {
    patterns: Vec<String>,
    regexes: Vec<Regex>,
    concurrent: bool,
    handler: BoxedHandler,
    bound_to: Option<NodeId>,
}

impl Route {
    /// Build a route from glob patterns, a default concurrency policy, and an
    /// async handler.
    ///
    /// Fails with [`Error::RouteBinding`] on an empty pattern list or an
    /// empty pattern; registration-time failures are fatal to startup by
    /// design.
    pub fn new<F, Fut>(patterns: &[&str], concurrent: bool, handler: F) -> Result<Self>
    where
        F: Fn(CallData, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if patterns.is_empty() {
            return Err(Error::route_binding("route needs at least one pattern"));
        }
        let regexes = patterns
            .iter()
            .map(|p| compile_glob(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns: patterns.iter().map(|p| (*p).to_string()).collect(),
            regexes,
            concurrent,
            handler: Arc::new(move |call, payload| Box::pin(handler(call, payload))),
            bound_to: None,
        })
    }

    /// Glob patterns as registered.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Default dispatch policy (overridable per envelope).
    pub fn concurrent(&self) -> bool {
        self.concurrent
    }

    /// True if `channel` matches **any** of the compiled patterns. Several
    /// routes on one node matching the same channel is normal; all of them
    /// fire.
    pub fn matches(&self, channel: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(channel))
    }

    /// Bind this route to the node it is registered on. Set once; rebinding
    /// is a programming error.
    pub(crate) fn bind(&mut self, node: NodeId) -> Result<()> {
        if let Some(bound) = &self.bound_to {
            return Err(Error::route_binding(format!(
                "route {:?} already bound to node {bound}",
                self.patterns
            )));
        }
        self.bound_to = Some(node);
        Ok(())
    }

    /// Invoke the handler for one delivery.
    ///
    /// Calling an unbound route fails loudly: it means the route never went
    /// through [`bind_routes`](crate::bus::IpcNode::bind_routes).
    pub async fn invoke(&self, call: CallData, payload: serde_json::Value) -> HandlerResult {
        if self.bound_to.is_none() {
            return Err(Error::route_binding(format!(
                "route {:?} invoked before binding",
                self.patterns
            )));
        }
        (self.handler)(call, payload).await
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("patterns", &self.patterns)
            .field("concurrent", &self.concurrent)
            .field("bound_to", &self.bound_to)
            .finish_non_exhaustive()
    }
}

/// Compile one glob pattern into an anchored regex: `*` becomes `.*`, every
/// other character is matched literally.
fn compile_glob(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(Error::route_binding("empty channel pattern"));
    }
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
        .map_err(|e| Error::route_binding(format!("pattern {pattern:?}: {e}")))
}
