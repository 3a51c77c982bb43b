//! Gateway protocol core
//!
//! - `close_code`: close code table and reconnect classification
//! - `session`: per-shard connection state machine
//! - `heartbeat`: ack tracking
//! - `payload`: frame encoding and decoding
//! - `transport`: socket collaborator (tokio-tungstenite in production)
//! - `terminator`: cross-shard kill switch

mod close_code;
mod heartbeat;
pub mod payload;
mod session;
mod terminator;
mod transport;

pub use close_code::{classify, CloseClass, GatewayCloseCode};
pub use heartbeat::{Beat, Heartbeater, MAX_MISSED_ACKS};
pub use session::{Handshake, ReconnectPlan, SessionState, ShardSession};
pub use terminator::Terminator;
pub use transport::{GatewaySocket, GatewayTransport, SocketMessage, WsSocket, WsTransport};
