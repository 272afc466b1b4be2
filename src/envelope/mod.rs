//! Envelope - the wire representation of one bus message.
//!
//! Every message on the shared topic is one JSON-encoded [`Envelope`]. The
//! `channel` field is not a transport topic: all nodes share a single topic
//! and match `channel` client-side against their registered route patterns.
//!
//! A blocking request is an ordinary envelope whose
//! `blocking_response_channel` is set; the receiver publishes a
//! [`BlockingReply`] back on that channel with `loopback` enabled so the
//! caller's own node can intercept it.

use serde::{Deserialize, Serialize};

use crate::types::{Error, NodeId, Result};

pub mod channels;

/// One message on the bus.
///
/// Immutable after construction. Round-tripping through
/// [`encode`](Envelope::encode)/[`decode`](Envelope::decode) reproduces every
/// field, including absent optionals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Logical route key (e.g. `"state:propulsion:started"`), matched
    /// client-side against route patterns.
    pub channel: String,

    /// Id of the publishing node.
    pub sender: NodeId,

    /// If false, the sender's own node ignores this envelope.
    pub loopback: bool,

    /// Opaque payload; handlers validate its shape themselves.
    pub payload: serde_json::Value,

    /// Overrides the matched route's dispatch policy for this one delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_override: Option<bool>,

    /// Present on blocking requests: the unique ephemeral channel the
    /// receiver must publish its [`BlockingReply`] to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking_response_channel: Option<String>,
}

impl Envelope {
    /// Build a fire-and-forget envelope.
    pub fn request(
        channel: impl Into<String>,
        sender: NodeId,
        payload: serde_json::Value,
        concurrency_override: Option<bool>,
        loopback: bool,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender,
            loopback,
            payload,
            concurrency_override,
            blocking_response_channel: None,
        }
    }

    /// Build a blocking request.
    ///
    /// The response channel is generated as `"{channel}:{sender}:{uuid}"`,
    /// unique across concurrent callers; it is also returned so the caller
    /// can register its waiter before publishing.
    pub fn blocking_request(
        channel: impl Into<String>,
        sender: NodeId,
        payload: serde_json::Value,
        concurrency_override: Option<bool>,
        loopback: bool,
    ) -> (Self, String) {
        let channel = channel.into();
        let response_channel = format!("{}:{}:{}", channel, sender, uuid::Uuid::new_v4());
        let envelope = Self {
            channel,
            sender,
            loopback,
            payload,
            concurrency_override,
            blocking_response_channel: Some(response_channel.clone()),
        };
        (envelope, response_channel)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from wire bytes.
    ///
    /// Rejects input missing any required field (`channel`, `sender`,
    /// `loopback`, `payload`) with [`Error::Parse`]; defaults are never
    /// substituted.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::parse(format!("invalid envelope: {e}")))
    }
}

/// Outcome of a blocking call, published on the response channel.
///
/// The handler's error is carried as a message string and re-raised on the
/// caller as [`Error::Handler`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BlockingReply {
    Ok(serde_json::Value),
    Err(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sender() -> NodeId {
        NodeId::from_string("propulsion").unwrap()
    }

    #[test]
    fn round_trip_preserves_all_fields() {
        let envelope = Envelope {
            channel: "state:propulsion:started".to_string(),
            sender: sender(),
            loopback: true,
            payload: json!({"component": "propulsion"}),
            concurrency_override: Some(false),
            blocking_response_channel: Some("reply:abc".to_string()),
        };

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trip_preserves_absent_optionals() {
        let envelope = Envelope::request("ping", sender(), json!(null), None, false);

        let bytes = envelope.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        // Absent optionals are omitted on the wire, not encoded as null.
        assert!(!text.contains("concurrency_override"));
        assert!(!text.contains("blocking_response_channel"));

        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.concurrency_override, None);
        assert_eq!(decoded.blocking_response_channel, None);
    }

    #[test]
    fn decode_rejects_missing_required_fields() {
        for partial in [
            json!({"sender": "a", "loopback": false, "payload": {}}),
            json!({"channel": "c", "loopback": false, "payload": {}}),
            json!({"channel": "c", "sender": "a", "payload": {}}),
            json!({"channel": "c", "sender": "a", "loopback": false}),
        ] {
            let bytes = serde_json::to_vec(&partial).unwrap();
            let err = Envelope::decode(&bytes).unwrap_err();
            assert!(matches!(err, Error::Parse(_)), "accepted {partial}");
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode(b"not json at all").unwrap_err(),
            Error::Parse(_)
        ));
    }

    #[test]
    fn blocking_request_generates_unique_response_channels() {
        let (first, first_channel) =
            Envelope::blocking_request("config:get", sender(), json!({}), None, false);
        let (second, second_channel) =
            Envelope::blocking_request("config:get", sender(), json!({}), None, false);

        assert_eq!(first.blocking_response_channel.as_deref(), Some(first_channel.as_str()));
        assert_ne!(first_channel, second_channel);
        assert!(first_channel.starts_with("config:get:propulsion:"));
        assert!(second.blocking_response_channel.is_some());
    }

    #[test]
    fn blocking_reply_round_trip() {
        for reply in [
            BlockingReply::Ok(json!({"speed": 12.5})),
            BlockingReply::Ok(serde_json::Value::Null),
            BlockingReply::Err("handler error: boom".to_string()),
        ] {
            let value = serde_json::to_value(&reply).unwrap();
            let back: BlockingReply = serde_json::from_value(value).unwrap();
            assert_eq!(back, reply);
        }
    }
}
