//! Events relayed from shards to the application

pub mod serialize;

pub use serialize::{serialize_dispatch, GatewayEvent};

use crate::gateway::{GatewayCloseCode, SessionState};
use serde::Serialize;

/// Everything a shard reports upward
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardEvent {
    /// A dispatch from the gateway
    Dispatch(GatewayEvent),
    /// The shard's session moved to a new state
    StateChanged { shard_id: u32, state: SessionState },
    /// The shard stopped for good
    Terminated {
        shard_id: u32,
        close_code: Option<GatewayCloseCode>,
    },
}

impl ShardEvent {
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Dispatch(event) => event.shard_id,
            Self::StateChanged { shard_id, .. } | Self::Terminated { shard_id, .. } => *shard_id,
        }
    }
}
