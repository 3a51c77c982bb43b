//! Domain error types for the Arrakis client
//!
//! Two taxonomies, one per subsystem:
//! - [`ApiError`]: everything the REST governor surfaces to the caller of `send`
//! - [`GatewayError`]: shard lifecycle, manager messaging and configuration
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns one of these enums.

use http::{Method, StatusCode};
use thiserror::Error;

/// Boxed error returned by transport collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// REST governor errors
///
/// None of these are retried by the governor. Callers pattern-match on the
/// variant to decide what to do next; `Unauthorized` means the credential
/// itself is bad and every gateway connection has already been torn down.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The bot token was rejected (HTTP 401)
    #[error("bot token rejected by {url}; all gateway connections have been terminated")]
    Unauthorized { url: String },

    /// Insufficient permissions for the request (HTTP 403)
    #[error("request to {url} was rejected due to insufficient bot permissions")]
    Forbidden { url: String },

    /// HTTP 429 despite local bucket bookkeeping
    #[error("rate limit hit for {method} {route} ({url}); local bucket state is out of sync with the server")]
    RateLimitAnomaly {
        route: &'static str,
        method: Method,
        url: String,
        retry_after: Option<f64>,
    },

    /// Error response whose body is an array instead of an error object
    #[error("{url} ({status}) - an error has occurred with an array response type - {body}")]
    MalformedResponse {
        status: StatusCode,
        url: String,
        body: String,
    },

    /// Any other non-success status
    #[error("{url} ({status}) - {message}")]
    Api {
        status: StatusCode,
        url: String,
        message: String,
    },

    /// The transport collaborator failed before a response was received
    #[error("transport failure for {method} {route}")]
    Transport {
        route: &'static str,
        method: Method,
        #[source]
        source: BoxError,
    },

    /// The bucket's queue is at capacity and the overflow policy rejects
    #[error("rate limit queue for {method} {route} is full ({depth}/{max})")]
    QueueFull {
        route: &'static str,
        method: Method,
        depth: usize,
        max: usize,
    },

    /// A success response carried a body that is not valid JSON
    #[error("failed to decode response body from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The queued request was dropped before it could be dispatched
    #[error("queued request for {method} {route} was abandoned before dispatch")]
    Abandoned { route: &'static str, method: Method },
}

impl ApiError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimitAnomaly { .. } => "rate_limit_anomaly",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Api { .. } => "api",
            Self::Transport { .. } => "transport",
            Self::QueueFull { .. } => "queue_full",
            Self::Decode { .. } => "decode",
            Self::Abandoned { .. } => "abandoned",
        }
    }

    /// True for the credential failure that terminates every shard
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// HTTP status attached to the error, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            Self::Forbidden { .. } => Some(StatusCode::FORBIDDEN),
            Self::RateLimitAnomaly { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::MalformedResponse { status, .. } | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Shard-side and configuration errors
///
/// Resumable and re-identify close codes never show up here; they are
/// ordinary state transitions. Only fatal close codes surface.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway closed the connection with a fatal close code
    #[error("shard {shard_id} closed with fatal code {code} ({reason}); all shards terminated")]
    FatalClose {
        shard_id: u32,
        code: u16,
        reason: &'static str,
    },

    /// The manager instructed the shard to stop while it was mid-operation
    #[error("shard {shard_id} was terminated")]
    Terminated { shard_id: u32 },

    /// Writing a frame to the socket failed
    #[error("shard {shard_id} failed to send a gateway frame")]
    Socket {
        shard_id: u32,
        #[source]
        source: BoxError,
    },

    /// The shard's task is gone and no longer accepts messages
    #[error("shard {shard_id} is unavailable")]
    ShardUnavailable { shard_id: u32 },

    /// The shard received the message but refused it
    #[error("shard {shard_id} rejected '{event}': {reason}")]
    ShardRejected {
        shard_id: u32,
        event: String,
        reason: String,
    },

    /// `start` was called on a manager that already spawned its shards
    #[error("shard manager already started")]
    AlreadyStarted,

    /// Metrics exporter could not be installed
    #[error("metrics exporter installation failed")]
    MetricsInstall(#[source] BoxError),

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Shard ID overflow: value exceeds u32::MAX (gateway API boundary)
    #[error("shard ID overflow: {value} exceeds u32::MAX")]
    ShardIdOverflow { value: u64 },
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::FatalClose { .. } => "fatal_close",
            Self::Terminated { .. } => "terminated",
            Self::Socket { .. } => "socket",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::ShardRejected { .. } => "shard_rejected",
            Self::AlreadyStarted => "already_started",
            Self::MetricsInstall(_) => "metrics_install",
            Self::Config(_) => "config",
            Self::ShardIdOverflow { .. } => "shard_overflow",
        }
    }
}
