//! REST client
//!
//! Routes every request through the bucket of its (route template, method)
//! pair. Buckets are created lazily on first use and live as long as the
//! client.

use crate::error::ApiError;
use crate::gateway::Terminator;
use crate::rest::bucket::RateLimitBucket;
use crate::rest::queue::QueueLimits;
use crate::rest::request::{ApiRequest, BucketKey};
use crate::rest::transport::HttpTransport;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Rate-limited REST client
pub struct RestClient<T: HttpTransport> {
    transport: Arc<T>,
    buckets: DashMap<BucketKey, Arc<RateLimitBucket<T>>>,
    queue_limits: QueueLimits,
    terminator: Option<Terminator>,
}

impl<T: HttpTransport> RestClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            buckets: DashMap::new(),
            queue_limits: QueueLimits::default(),
            terminator: None,
        }
    }

    /// Bound each bucket's queue
    pub fn with_queue_limits(mut self, limits: QueueLimits) -> Self {
        self.queue_limits = limits;
        self
    }

    /// Close every gateway connection when the token is rejected
    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = Some(terminator);
        self
    }

    /// Get or create the bucket for a key
    pub fn bucket(&self, key: &BucketKey) -> Arc<RateLimitBucket<T>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
            Arc::new(RateLimitBucket::new(
                key.clone(),
                Arc::clone(&self.transport),
                self.queue_limits,
                self.terminator.clone(),
            ))
        });
        Arc::clone(entry.value())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Send a request through its bucket
    ///
    /// Resolves with the decoded JSON body, `None` for empty successes.
    pub async fn send(&self, request: ApiRequest) -> Result<Option<Value>, ApiError> {
        let bucket = self.bucket(&request.bucket_key());
        bucket.send(request).await
    }

    /// Send and decode the body into `R`
    pub async fn send_as<R: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<Option<R>, ApiError> {
        let url = request.route.path();
        match self.send(request).await? {
            Some(body) => serde_json::from_value(body)
                .map(Some)
                .map_err(|source| ApiError::Decode { url, source }),
            None => Ok(None),
        }
    }
}
