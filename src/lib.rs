//! Arrakis Client - resilience core for the Discord REST and gateway APIs
//!
//! Two independent subsystems protect the platform's scarce resources:
//! - [`rest`]: the outbound request governor. Per-route rate-limit buckets,
//!   FIFO queueing of deferred requests and refill scheduling.
//! - [`shard`]: the shard lifecycle manager. Staggered shard spawning,
//!   manager/shard message passing and the gateway reconnection state
//!   machine in [`gateway`].
//!
//! A fatal authentication failure on either side tears down every shard
//! through the shared [`gateway::Terminator`].
//!
//! ```ignore
//! use arrakis_client::{ClientConfig, RestClient, ShardManager, ShardSettings};
//! use arrakis_client::rest::{ApiRequest, ReqwestTransport, Route};
//! use arrakis_client::gateway::WsTransport;
//!
//! let config = ClientConfig::from_env()?;
//! let (manager, mut events) = ShardManager::new(ShardSettings::from_config(&config), WsTransport);
//! let rest = RestClient::new(ReqwestTransport::new(&config)?)
//!     .with_terminator(manager.terminator());
//!
//! manager.start(config.spawn_interval).await?;
//! rest.send(ApiRequest::get(Route::Channel { channel_id: 1234 })).await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod rest;
pub mod shard;

pub use config::ClientConfig;
pub use error::{ApiError, BoxError, GatewayError};
pub use rest::RestClient;
pub use shard::{ShardManager, ShardMessage, ShardSettings};
