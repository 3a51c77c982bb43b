//! Gateway frame encoding and decoding

use serde::Deserialize;
use serde_json::{json, Value};
use twilight_model::gateway::{Intents, OpCode, ShardId};

/// Library name reported in identify properties
const LIBRARY: &str = "arrakis";

/// One frame received from the gateway
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Known opcode of the frame
    pub fn opcode(&self) -> Option<OpCode> {
        opcode(self.op)
    }
}

fn opcode(op: u8) -> Option<OpCode> {
    Some(match op {
        0 => OpCode::Dispatch,
        1 => OpCode::Heartbeat,
        2 => OpCode::Identify,
        3 => OpCode::PresenceUpdate,
        4 => OpCode::VoiceStateUpdate,
        6 => OpCode::Resume,
        7 => OpCode::Reconnect,
        8 => OpCode::RequestGuildMembers,
        9 => OpCode::InvalidSession,
        10 => OpCode::Hello,
        11 => OpCode::HeartbeatAck,
        _ => return None,
    })
}

/// `d` of a Hello frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HelloData {
    /// Milliseconds
    pub heartbeat_interval: u64,
}

/// The parts of a READY dispatch the session needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub guilds: Vec<Value>,
}

pub fn heartbeat(sequence: Option<u64>) -> Value {
    json!({
        "op": OpCode::Heartbeat,
        "d": sequence,
    })
}

pub fn identify(token: &str, intents: Intents, shard: ShardId) -> Value {
    json!({
        "op": OpCode::Identify,
        "d": {
            "token": token,
            "intents": intents.bits(),
            "shard": [shard.number(), shard.total()],
            "properties": {
                "os": std::env::consts::OS,
                "browser": LIBRARY,
                "device": LIBRARY,
            },
        },
    })
}

pub fn resume(token: &str, session_id: &str, sequence: u64) -> Value {
    json!({
        "op": OpCode::Resume,
        "d": {
            "token": token,
            "session_id": session_id,
            "seq": sequence,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let frame = InboundFrame::parse(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
            .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Hello));
        let hello: HelloData = serde_json::from_value(frame.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn test_parse_dispatch() {
        let frame = InboundFrame::parse(
            r#"{"op":0,"s":42,"t":"READY","d":{"session_id":"abc","resume_gateway_url":"wss://resume.example","guilds":[{"id":"1"}]}}"#,
        )
        .unwrap();
        assert_eq!(frame.opcode(), Some(OpCode::Dispatch));
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.t.as_deref(), Some("READY"));

        let ready: ReadyData = serde_json::from_value(frame.d).unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://resume.example"));
        assert_eq!(ready.guilds.len(), 1);
    }

    #[test]
    fn test_unknown_opcode() {
        let frame = InboundFrame::parse(r#"{"op":99}"#).unwrap();
        assert_eq!(frame.opcode(), None);
        assert_eq!(frame.d, Value::Null);
    }

    #[test]
    fn test_identify_payload() {
        let payload = identify("token", Intents::GUILDS, ShardId::new(1, 3));
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "token");
        assert_eq!(payload["d"]["intents"], Intents::GUILDS.bits());
        assert_eq!(payload["d"]["shard"], json!([1, 3]));
    }

    #[test]
    fn test_resume_and_heartbeat_payloads() {
        let payload = resume("token", "session", 7);
        assert_eq!(payload["op"], 6);
        assert_eq!(payload["d"]["session_id"], "session");
        assert_eq!(payload["d"]["seq"], 7);

        assert_eq!(heartbeat(Some(3)), json!({ "op": 1, "d": 3 }));
        assert_eq!(heartbeat(None), json!({ "op": 1, "d": null }));
    }
}
