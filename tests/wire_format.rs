//! Wire format of relayed events
//!
//! Consumers of the event stream decode these envelopes by field name, so the
//! JSON shape is a contract. Each case compares against an inline fixture
//! after pinning the two generated fields.

use arrakis_client::events::{serialize_dispatch, GatewayEvent, ShardEvent};
use arrakis_client::gateway::{GatewayCloseCode, SessionState};
use serde_json::{json, Value};

const EVENT_ID: &str = "00000000-0000-4000-8000-000000000001";
const TIMESTAMP: u64 = 1_700_000_000_000;

/// Serialize with deterministic id and timestamp
fn pinned(event: GatewayEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap();
    value["event_id"] = json!(EVENT_ID);
    value["timestamp"] = json!(TIMESTAMP);
    value
}

fn dispatch(name: &str, sequence: u64, data: Value) -> GatewayEvent {
    serialize_dispatch(3, Some(sequence), name, data).unwrap()
}

const REQUIRED_ENVELOPE_FIELDS: &[&str] = &[
    "event_id",
    "event_type",
    "shard_id",
    "sequence",
    "timestamp",
    "guild_id",
    "channel_id",
    "user_id",
    "data",
];

#[test]
fn guild_join_envelope() {
    let event = dispatch(
        "GUILD_CREATE",
        5,
        json!({ "id": "123456789012345678", "name": "Test Guild", "member_count": 42 }),
    );

    assert_eq!(
        pinned(event),
        json!({
            "event_id": EVENT_ID,
            "event_type": "guild.join",
            "shard_id": 3,
            "sequence": 5,
            "timestamp": TIMESTAMP,
            "guild_id": "123456789012345678",
            "channel_id": null,
            "user_id": null,
            "data": { "id": "123456789012345678", "name": "Test Guild", "member_count": 42 }
        })
    );
}

#[test]
fn member_join_envelope() {
    let event = dispatch(
        "GUILD_MEMBER_ADD",
        9,
        json!({ "guild_id": "123456789012345678", "user": { "id": "987654321098765432" } }),
    );

    assert_eq!(
        pinned(event),
        json!({
            "event_id": EVENT_ID,
            "event_type": "member.join",
            "shard_id": 3,
            "sequence": 9,
            "timestamp": TIMESTAMP,
            "guild_id": "123456789012345678",
            "channel_id": null,
            "user_id": "987654321098765432",
            "data": { "guild_id": "123456789012345678", "user": { "id": "987654321098765432" } }
        })
    );
}

#[test]
fn interaction_envelope() {
    let data = json!({
        "id": "444444444444444444",
        "guild_id": "123456789012345678",
        "channel": { "id": "333333333333333333" },
        "member": { "user": { "id": "987654321098765432" } }
    });
    let event = dispatch("INTERACTION_CREATE", 12, data.clone());

    assert_eq!(
        pinned(event),
        json!({
            "event_id": EVENT_ID,
            "event_type": "interaction.create",
            "shard_id": 3,
            "sequence": 12,
            "timestamp": TIMESTAMP,
            "guild_id": "123456789012345678",
            "channel_id": "333333333333333333",
            "user_id": "987654321098765432",
            "data": data
        })
    );
}

#[test]
fn every_envelope_has_the_required_fields() {
    let events = [
        dispatch("GUILD_DELETE", 1, json!({ "id": "1", "unavailable": false })),
        dispatch("MESSAGE_CREATE", 2, json!({ "channel_id": "2", "author": { "id": "3" } })),
        dispatch("TYPING_START", 3, json!({})),
    ];

    for event in events {
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        for field in REQUIRED_ENVELOPE_FIELDS {
            assert!(
                obj.contains_key(*field),
                "{} envelope missing '{field}'",
                event.event_type
            );
        }
        uuid::Uuid::parse_str(&event.event_id).unwrap();
    }
}

#[test]
fn shard_events_are_tagged_by_kind() {
    let state = ShardEvent::StateChanged {
        shard_id: 1,
        state: SessionState::Resuming,
    };
    assert_eq!(
        serde_json::to_value(&state).unwrap(),
        json!({ "kind": "state_changed", "shard_id": 1, "state": "resuming" })
    );

    let terminated = ShardEvent::Terminated {
        shard_id: 2,
        close_code: Some(GatewayCloseCode::DisallowedIntents),
    };
    assert_eq!(
        serde_json::to_value(&terminated).unwrap(),
        json!({ "kind": "terminated", "shard_id": 2, "close_code": 4014 })
    );

    let stopped = ShardEvent::Terminated {
        shard_id: 0,
        close_code: None,
    };
    assert_eq!(serde_json::to_value(&stopped).unwrap()["close_code"], Value::Null);

    let relayed = ShardEvent::Dispatch(dispatch("GUILD_CREATE", 1, json!({ "id": "7" })));
    let value = serde_json::to_value(&relayed).unwrap();
    assert_eq!(value["kind"], "dispatch");
    assert_eq!(value["event_type"], "guild.join");
    assert_eq!(value["guild_id"], "7");
}
