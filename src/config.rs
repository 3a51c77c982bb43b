//! Client configuration module
//!
//! Handles loading configuration from environment variables (and `.env`).

use crate::error::GatewayError;
use crate::rest::{OverflowPolicy, QueueLimits};
use std::env;
use std::time::Duration;
use twilight_model::gateway::Intents;

/// Delay between shard spawns recommended by the platform (identify budget)
pub const RECOMMENDED_SPAWN_INTERVAL: Duration = Duration::from_millis(5500);

/// Default REST API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

/// Default gateway URL
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Number of shards spawned by the manager
    pub total_shards: u32,

    /// Delay between consecutive shard spawns
    pub spawn_interval: Duration,

    /// REST API base URL (no trailing slash)
    pub api_base_url: String,

    /// Gateway URL used for fresh connections
    pub gateway_url: String,

    /// Gateway intents sent with every identify
    pub intents: Intents,

    /// Bound and overflow policy of every rate-limit queue
    pub queue_limits: QueueLimits,

    /// Base delay before a shard reconnects
    pub reconnect_delay: Duration,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("DISCORD_BOT_TOKEN"))
            .ok_or_else(|| {
                GatewayError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        let total_shards: u64 = parse_or(&lookup, "TOTAL_SHARDS", 1)?;
        let total_shards = u32::try_from(total_shards)
            .map_err(|_| GatewayError::ShardIdOverflow { value: total_shards })?;
        if total_shards == 0 {
            return Err(GatewayError::Config(
                "TOTAL_SHARDS must be at least 1".to_string(),
            ));
        }

        let spawn_interval = Duration::from_millis(parse_or(
            &lookup,
            "SPAWN_INTERVAL_MS",
            RECOMMENDED_SPAWN_INTERVAL.as_millis() as u64,
        )?);

        let api_base_url = lookup("API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let gateway_url = lookup("GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());

        let intents = match lookup("INTENTS") {
            Some(raw) => Intents::from_bits_truncate(raw.parse().map_err(|e| {
                GatewayError::Config(format!("INTENTS must be a valid bitfield: {e}"))
            })?),
            None => Self::default_intents(),
        };

        let max_depth = match lookup("MAX_QUEUE_DEPTH") {
            Some(raw) => Some(raw.parse().map_err(|e| {
                GatewayError::Config(format!("MAX_QUEUE_DEPTH must be a valid number: {e}"))
            })?),
            None => None,
        };

        let overflow = match lookup("QUEUE_OVERFLOW").as_deref() {
            None | Some("reject") => OverflowPolicy::Reject,
            Some("block") => OverflowPolicy::Block,
            Some(other) => {
                return Err(GatewayError::Config(format!(
                    "QUEUE_OVERFLOW must be 'reject' or 'block', got '{other}'"
                )))
            }
        };

        let reconnect_delay = Duration::from_millis(parse_or(&lookup, "RECONNECT_DELAY_MS", 1000)?);

        let http_port = lookup("HTTP_PORT")
            .or_else(|| lookup("METRICS_PORT"))
            .unwrap_or_else(|| "9090".to_string())
            .parse()
            .map_err(|e| GatewayError::Config(format!("HTTP_PORT must be a valid port number: {e}")))?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            discord_token,
            total_shards,
            spawn_interval,
            api_base_url,
            gateway_url,
            intents,
            queue_limits: QueueLimits {
                max_depth,
                overflow,
            },
            reconnect_delay,
            http_port,
            log_level,
        })
    }

    /// Intents used when `INTENTS` is not set
    ///
    /// - GUILDS: guild lifecycle events
    /// - GUILD_MEMBERS: member events (privileged)
    pub fn default_intents() -> Intents {
        Intents::GUILDS | Intents::GUILD_MEMBERS
    }
}

fn parse_or<F>(lookup: &F, key: &str, default: u64) -> Result<u64, GatewayError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| GatewayError::Config(format!("{key} must be a valid number: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(config.total_shards, 1);
        assert_eq!(config.spawn_interval, RECOMMENDED_SPAWN_INTERVAL);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.queue_limits, QueueLimits::default());
        assert_eq!(config.http_port, 9090);
        assert!(config.intents.contains(Intents::GUILDS));
        assert!(!config.intents.contains(Intents::MESSAGE_CONTENT));
    }

    #[test]
    fn test_token_fallback() {
        let config =
            ClientConfig::from_lookup(lookup_from(&[("DISCORD_BOT_TOKEN", "fallback")])).unwrap();
        assert_eq!(config.discord_token, "fallback");
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_queue_bounds() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("MAX_QUEUE_DEPTH", "50"),
            ("QUEUE_OVERFLOW", "block"),
        ]))
        .unwrap();

        assert_eq!(config.queue_limits.max_depth, Some(50));
        assert_eq!(config.queue_limits.overflow, OverflowPolicy::Block);

        let err = ClientConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("QUEUE_OVERFLOW", "drop"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("QUEUE_OVERFLOW"));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("TOTAL_SHARDS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_shard_overflow() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("TOTAL_SHARDS", "4294967296"),
        ]))
        .unwrap_err();
        assert!(matches!(err, GatewayError::ShardIdOverflow { value: 4294967296 }));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("DISCORD_TOKEN", "abc"),
            ("API_BASE_URL", "http://localhost:8080/api/"),
        ]))
        .unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080/api");
    }
}
