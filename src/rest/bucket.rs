//! Rate-limit bucket
//!
//! One bucket gates every request of a (route template, method) pair. The
//! bucket is a small state machine:
//!
//! ```text
//! Unprobed ──send──▶ Probing ──response──▶ Known{remaining > 0} ◀─refill─┐
//!                                               │                       │
//!                                               └─remaining == 0─▶ Known{0} (limited)
//! ```
//!
//! `remaining` is a speculative, locally decremented counter. It is adopted
//! from headers once, on the first observation; after that the local
//! countdown is kept so concurrent callers see a consistent view, and the
//! refill timer restores it to `limit`.

use crate::error::ApiError;
use crate::gateway::{GatewayCloseCode, Terminator};
use crate::metrics::ClientMetrics;
use crate::rest::headers::RateLimitHeaders;
use crate::rest::queue::{QueueLimits, RateLimitQueue};
use crate::rest::request::{ApiRequest, BucketKey};
use crate::rest::response::{classify, VALID_CODES};
use crate::rest::transport::HttpTransport;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Limiter capacity of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// No request sent yet; the next one goes out as the probe
    Unprobed,
    /// The probe is in flight; everything else waits for its headers
    Probing,
    /// The route answered without limiter headers
    Unbounded,
    /// Limiter state learned from headers
    Known { remaining: u32, limit: u32 },
}

impl Capacity {
    /// Take one unit of capacity if available
    fn try_acquire(&mut self) -> bool {
        match self {
            Self::Unprobed => {
                *self = Self::Probing;
                true
            }
            Self::Probing => false,
            Self::Unbounded => true,
            Self::Known { remaining, .. } if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            Self::Known { .. } => false,
        }
    }

    /// Return a unit taken by a request that never reached the server
    fn give_back(&mut self) {
        match self {
            Self::Probing => *self = Self::Unprobed,
            Self::Known { remaining, limit } => *remaining = (*remaining + 1).min(*limit),
            Self::Unprobed | Self::Unbounded => {}
        }
    }

    /// Fold a response's headers into the capacity
    ///
    /// Only a successful response without limiter headers proves the route
    /// unlimited; a headerless error hands the probe role on.
    fn observe(self, headers: &RateLimitHeaders, success: bool) -> Self {
        match (self, headers.limit) {
            // Keep the local countdown once a limit is established
            (Self::Known { remaining, .. }, Some(limit)) => Self::Known { remaining, limit },
            (known @ Self::Known { .. }, None) => known,
            (_, Some(limit)) => Self::Known {
                remaining: headers.remaining.unwrap_or(limit),
                limit,
            },
            (Self::Unbounded, None) if headers.is_empty() => Self::Unbounded,
            (_, None) if headers.is_empty() && success => Self::Unbounded,
            (_, None) if headers.is_empty() => Self::Unprobed,
            (_, None) => match headers.remaining {
                Some(remaining) => Self::Known {
                    remaining,
                    limit: remaining.max(1),
                },
                None => Self::Unprobed,
            },
        }
    }

    /// True when sends are being deferred
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Probing | Self::Known { remaining: 0, .. })
    }
}

struct BucketState {
    capacity: Capacity,
    reset_at: Option<SystemTime>,
    server_bucket: Option<String>,
    /// The single pending refill timer
    refill: Option<JoinHandle<()>>,
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub capacity: Capacity,
    pub reset_at: Option<SystemTime>,
    pub server_bucket: Option<String>,
    pub refill_pending: bool,
    pub queued: usize,
}

/// Rate-limit bucket for one (route template, method) pair
pub struct RateLimitBucket<T: HttpTransport> {
    key: BucketKey,
    transport: Arc<T>,
    queue: RateLimitQueue,
    state: Mutex<BucketState>,
    terminator: Option<Terminator>,
    metrics: ClientMetrics,
    refills_scheduled: AtomicU64,
}

impl<T: HttpTransport> RateLimitBucket<T> {
    pub fn new(
        key: BucketKey,
        transport: Arc<T>,
        queue_limits: QueueLimits,
        terminator: Option<Terminator>,
    ) -> Self {
        Self {
            key,
            transport,
            queue: RateLimitQueue::new(queue_limits),
            state: Mutex::new(BucketState {
                capacity: Capacity::Unprobed,
                reset_at: None,
                server_bucket: None,
                refill: None,
            }),
            terminator,
            metrics: ClientMetrics::new(),
            refills_scheduled: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn capacity(&self) -> Capacity {
        self.state.lock().capacity
    }

    /// Number of requests waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending_refill(&self) -> bool {
        self.state.lock().refill.is_some()
    }

    /// Refill timers scheduled over the bucket's lifetime
    pub fn refills_scheduled(&self) -> u64 {
        self.refills_scheduled.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let state = self.state.lock();
        BucketSnapshot {
            capacity: state.capacity,
            reset_at: state.reset_at,
            server_bucket: state.server_bucket.clone(),
            refill_pending: state.refill.is_some(),
            queued: self.queue.len(),
        }
    }

    /// Send a request, or queue it until the bucket refills
    ///
    /// Resolves with the decoded body (`None` for empty successes) once the
    /// request has actually been answered.
    pub async fn send(self: &Arc<Self>, request: ApiRequest) -> Result<Option<Value>, ApiError> {
        let admitted = self.state.lock().capacity.try_acquire();
        if admitted {
            return self.dispatch(request).await;
        }

        debug!(
            bucket = %self.key,
            "Rate limit reached, request queued until the bucket refills"
        );
        let slot = self.queue.reserve(&self.key).await?;

        // Capacity may have come back while waiting for a slot
        let deferred = {
            let mut state = self.state.lock();
            if state.capacity.try_acquire() {
                Err(request)
            } else {
                Ok(self.queue.add(&self.key, request, slot))
            }
        };

        match deferred {
            Ok(pending) => {
                self.metrics.record_queued(&self.key, self.queue.len());
                pending.await
            }
            Err(request) => self.dispatch(request).await,
        }
    }

    /// Perform the exchange for a request that already holds capacity
    async fn dispatch(self: &Arc<Self>, request: ApiRequest) -> Result<Option<Value>, ApiError> {
        let started = Instant::now();

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(source) => {
                self.give_back();
                let err = ApiError::Transport {
                    route: self.key.route,
                    method: self.key.method.clone(),
                    source,
                };
                warn!(bucket = %self.key, error = %err, "API request failed in transport");
                self.metrics.record_api_error(&self.key, err.error_type_label());
                return Err(err);
            }
        };

        self.metrics
            .record_request(&self.key, response.status, started.elapsed());
        self.set_limits(
            &RateLimitHeaders::from_headers(&response.headers),
            VALID_CODES.contains(&response.status),
        );

        let result = classify(&self.key, &response);
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }

    fn report(&self, err: &ApiError) {
        self.metrics.record_api_error(&self.key, err.error_type_label());

        match err {
            ApiError::Unauthorized { url } => {
                error!(bucket = %self.key, url, "Bot token is invalid, terminating all gateway connections");
                if let Some(terminator) = &self.terminator {
                    terminator.terminate_all(GatewayCloseCode::AuthenticationFailed);
                }
            }
            ApiError::RateLimitAnomaly { retry_after, .. } => {
                warn!(
                    bucket = %self.key,
                    retry_after,
                    snapshot = ?self.snapshot(),
                    "Received 429 despite local bucket accounting"
                );
            }
            other => debug!(bucket = %self.key, error = %other, "API request failed"),
        }
    }

    /// Update limiter state from response headers
    pub(crate) fn set_limits(self: &Arc<Self>, headers: &RateLimitHeaders, success: bool) {
        let mut state = self.state.lock();
        state.capacity = state.capacity.observe(headers, success);

        if headers.reset.is_some() {
            state.reset_at = headers.reset_at();
        }

        if let Some(hash) = &headers.bucket {
            if state.server_bucket.as_deref() != Some(hash.as_str()) {
                debug!(bucket = %self.key, server_bucket = %hash, "Server bucket hash observed");
                state.server_bucket = Some(hash.clone());
            }
        }

        if headers.global {
            debug!(bucket = %self.key, "Response flagged as globally rate limited");
        }

        if state.refill.is_none() {
            if let Some(delay) = headers.refill_delay(SystemTime::now()) {
                state.refill = Some(self.schedule_refill(delay));
            }
        }

        drop(state);
        self.drain();
    }

    fn schedule_refill(self: &Arc<Self>, delay: Duration) -> JoinHandle<()> {
        self.refills_scheduled.fetch_add(1, Ordering::Relaxed);
        debug!(
            bucket = %self.key,
            delay_ms = delay.as_millis() as u64,
            "Scheduled bucket refill"
        );

        let bucket = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(bucket) = bucket.upgrade() {
                bucket.refill();
            }
        })
    }

    fn refill(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.refill = None;
            state.reset_at = None;
            if let Capacity::Known { limit, .. } = state.capacity {
                state.capacity = Capacity::Known {
                    remaining: limit,
                    limit,
                };
            }
        }

        self.metrics.record_refill(&self.key);
        debug!(bucket = %self.key, queued = self.queue.len(), "Bucket refilled");
        self.drain();
    }

    /// A request failed before reaching the server: return its unit
    ///
    /// No response means no refill gets scheduled for it, so the unit must
    /// come back here or the queue could wait forever.
    fn give_back(self: &Arc<Self>) {
        self.state.lock().capacity.give_back();
        self.drain();
    }

    /// Dispatch queued requests from the head while capacity lasts
    ///
    /// Requests are started in queue order; each caller is resolved with its
    /// own result.
    fn drain(self: &Arc<Self>) {
        let released = {
            let mut state = self.state.lock();
            self.queue.free(|| state.capacity.try_acquire())
        };

        if released.is_empty() {
            return;
        }

        self.metrics.set_queue_depth(&self.key, self.queue.len());
        debug!(bucket = %self.key, released = released.len(), "Draining rate limit queue");

        let bucket = Arc::clone(self);
        tokio::spawn(async move {
            let sends = released.into_iter().map(|queued| {
                let bucket = Arc::clone(&bucket);
                async move {
                    let result = bucket.dispatch(queued.request).await;
                    let _ = queued.reply.send(result);
                }
            });
            join_all(sends).await;
        });
    }
}

impl<T: HttpTransport> Drop for RateLimitBucket<T> {
    fn drop(&mut self) {
        if let Some(refill) = self.state.get_mut().refill.take() {
            refill.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(remaining: Option<u32>, limit: Option<u32>) -> RateLimitHeaders {
        RateLimitHeaders {
            remaining,
            limit,
            reset_after: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_unprobed_admits_exactly_one() {
        let mut capacity = Capacity::Unprobed;
        assert!(capacity.try_acquire());
        assert_eq!(capacity, Capacity::Probing);
        assert!(!capacity.try_acquire());
        assert!(capacity.is_limited());
    }

    #[test]
    fn test_first_observation_adopts_header_remaining() {
        let capacity = Capacity::Probing.observe(&headers(Some(4), Some(5)), true);
        assert_eq!(capacity, Capacity::Known { remaining: 4, limit: 5 });
    }

    #[test]
    fn test_established_limit_keeps_local_countdown() {
        let capacity = Capacity::Known { remaining: 2, limit: 5 };
        assert_eq!(
            capacity.observe(&headers(Some(4), Some(5)), true),
            Capacity::Known { remaining: 2, limit: 5 }
        );
        // Headers without limiter info leave a known bucket alone
        assert_eq!(capacity.observe(&RateLimitHeaders::default(), true), capacity);
    }

    #[test]
    fn test_probe_without_headers_is_unbounded() {
        let mut capacity = Capacity::Probing.observe(&RateLimitHeaders::default(), true);
        assert_eq!(capacity, Capacity::Unbounded);
        assert!(capacity.try_acquire());
        assert!(capacity.try_acquire());
    }

    #[test]
    fn test_known_capacity_counts_down_to_limited() {
        let mut capacity = Capacity::Known { remaining: 2, limit: 2 };
        assert!(capacity.try_acquire());
        assert!(capacity.try_acquire());
        assert!(!capacity.try_acquire());
        assert!(capacity.is_limited());
    }

    #[test]
    fn test_headerless_error_keeps_route_gated() {
        let capacity = Capacity::Probing.observe(&RateLimitHeaders::default(), false);
        assert_eq!(capacity, Capacity::Unprobed);

        let mut capacity = capacity;
        assert!(capacity.try_acquire());
        assert!(capacity.is_limited());

        // An unlimited route stays unlimited through a headerless error
        assert_eq!(
            Capacity::Unbounded.observe(&RateLimitHeaders::default(), false),
            Capacity::Unbounded
        );
    }

    #[test]
    fn test_give_back_returns_the_unit() {
        let mut capacity = Capacity::Known { remaining: 0, limit: 1 };
        capacity.give_back();
        assert_eq!(capacity, Capacity::Known { remaining: 1, limit: 1 });
        // Never above the limit
        capacity.give_back();
        assert_eq!(capacity, Capacity::Known { remaining: 1, limit: 1 });

        let mut probing = Capacity::Probing;
        probing.give_back();
        assert_eq!(probing, Capacity::Unprobed);
    }
}
