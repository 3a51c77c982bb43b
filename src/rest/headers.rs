//! Rate-limit response headers

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header names used to identify the rate limit information of a response
pub mod names {
    pub const GLOBAL: &str = "x-ratelimit-global";
    pub const LIMIT: &str = "x-ratelimit-limit";
    pub const REMAINING: &str = "x-ratelimit-remaining";
    pub const RESET: &str = "x-ratelimit-reset";
    pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
    pub const BUCKET: &str = "x-ratelimit-bucket";
}

/// Parsed rate-limit headers of one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
    /// Unix timestamp (seconds) of the next refill
    pub reset: Option<f64>,
    /// Seconds until the next refill
    pub reset_after: Option<f64>,
    /// Server-side bucket hash; recorded, not used for grouping
    pub bucket: Option<String>,
    /// Global limit flag; recorded, not consumed
    pub global: bool,
}

impl RateLimitHeaders {
    /// Parse from a response header map
    ///
    /// Header names are case-insensitive; unparsable values count as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            remaining: parse(headers, names::REMAINING),
            limit: parse(headers, names::LIMIT),
            reset: parse(headers, names::RESET),
            reset_after: parse(headers, names::RESET_AFTER),
            bucket: header_str(headers, names::BUCKET).map(str::to_owned),
            global: header_str(headers, names::GLOBAL)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }

    /// True when the response carried no limiter information at all
    pub fn is_empty(&self) -> bool {
        self.remaining.is_none()
            && self.limit.is_none()
            && self.reset.is_none()
            && self.reset_after.is_none()
    }

    /// Absolute time of the next refill
    pub fn reset_at(&self) -> Option<SystemTime> {
        self.reset
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(|since_epoch| UNIX_EPOCH + since_epoch)
    }

    /// Delay until the bucket refills
    ///
    /// `reset-after` wins when present; otherwise `reset - now`.
    pub fn refill_delay(&self, now: SystemTime) -> Option<Duration> {
        if let Some(after) = self.reset_after {
            return Some(seconds(after));
        }

        self.reset_at()
            .map(|at| at.duration_since(now).unwrap_or(Duration::ZERO))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name).and_then(|v| v.parse().ok())
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}
