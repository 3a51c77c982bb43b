//! Manager ↔ shard messages
//!
//! Messages are keyed by event name and carry a JSON payload. Every message
//! gets exactly one reply.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Event names understood by a shard
pub mod events {
    /// Report session state
    pub const STATUS: &str = "status";
    /// Forward a raw `{op, d}` payload to the gateway
    pub const GATEWAY_SEND: &str = "gateway.send";
    /// Force a resumable reconnect
    pub const RECONNECT: &str = "reconnect";
    /// Close the connection; the payload is the close code
    pub const DISCONNECT: &str = "disconnect";
}

/// A message addressed to one or more shards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl ShardMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    pub fn status() -> Self {
        Self::new(events::STATUS, Value::Null)
    }

    pub fn gateway_send(payload: Value) -> Self {
        Self::new(events::GATEWAY_SEND, payload)
    }

    pub fn reconnect() -> Self {
        Self::new(events::RECONNECT, Value::Null)
    }

    pub fn disconnect(code: u16) -> Self {
        Self::new(events::DISCONNECT, Value::from(code))
    }
}

pub(crate) type ShardReply = oneshot::Sender<Result<Value, GatewayError>>;

/// A message in flight to a shard task
pub(crate) struct ShardCommand {
    pub(crate) message: ShardMessage,
    pub(crate) reply: ShardReply,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape() {
        let message = ShardMessage::disconnect(4004);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({ "event": "disconnect", "payload": 4004 })
        );

        let parsed: ShardMessage = serde_json::from_value(json!({ "event": "status" })).unwrap();
        assert_eq!(parsed, ShardMessage::status());
    }
}
