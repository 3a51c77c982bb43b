//! Shard management module
//!
//! - `manager`: staggered spawning, broadcast and unicast messaging
//! - `runner`: per-shard event loop driving the session state machine
//! - `message`: manager ↔ shard message protocol
//! - `state`: shared shard health for readiness checks

mod manager;
mod message;
mod runner;
mod state;

pub use manager::{ShardManager, ShardSettings, DEFAULT_RECONNECT_DELAY};
pub use message::{events, ShardMessage};
pub use state::{ShardState, ShardStateEntry};
