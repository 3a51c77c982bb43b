//! Event envelope serialization
//!
//! Wraps raw gateway dispatches into the JSON envelope relayed to the
//! application.

use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Dispatches that only matter to the session and are not relayed
const SESSION_DISPATCHES: [&str; 2] = ["READY", "RESUMED"];

/// Relayed gateway event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    pub shard_id: u32,
    pub sequence: Option<u64>,
    pub timestamp: u64,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub data: Value,
}

/// Wrap a dispatch (op 0) into a relayed event
///
/// Returns None for session dispatches.
pub fn serialize_dispatch(
    shard_id: u32,
    sequence: Option<u64>,
    dispatch: &str,
    data: Value,
) -> Option<GatewayEvent> {
    if SESSION_DISPATCHES.contains(&dispatch) {
        return None;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();

    Some(GatewayEvent {
        event_id: Uuid::new_v4().to_string(),
        event_type: event_type(dispatch),
        shard_id,
        sequence,
        timestamp,
        guild_id: snowflake(&data, &["guild_id"]).or_else(|| guild_scoped_id(dispatch, &data)),
        channel_id: snowflake(&data, &["channel_id"]).or_else(|| {
            data.get("channel")
                .and_then(|channel| snowflake(channel, &["id"]))
        }),
        user_id: snowflake(&data, &["user", "id"])
            .or_else(|| snowflake(&data, &["author", "id"]))
            .or_else(|| snowflake(&data, &["member", "user", "id"])),
        data,
    })
}

/// Dotted event name, e.g. `MESSAGE_CREATE` → `message.create`
pub fn event_type(dispatch: &str) -> String {
    match dispatch {
        "GUILD_CREATE" => "guild.join".to_string(),
        "GUILD_DELETE" => "guild.leave".to_string(),
        "GUILD_MEMBER_ADD" => "member.join".to_string(),
        "GUILD_MEMBER_REMOVE" => "member.leave".to_string(),
        "GUILD_MEMBER_UPDATE" => "member.update".to_string(),
        other => other.to_ascii_lowercase().replace('_', "."),
    }
}

/// Guild events carry the guild id as `id`
fn guild_scoped_id(dispatch: &str, data: &Value) -> Option<String> {
    matches!(dispatch, "GUILD_CREATE" | "GUILD_UPDATE" | "GUILD_DELETE")
        .then(|| snowflake(data, &["id"]))
        .flatten()
}

fn snowflake(data: &Value, path: &[&str]) -> Option<String> {
    let value = path.iter().try_fold(data, |node, key| node.get(key))?;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
