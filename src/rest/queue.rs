//! Rate-limit queue
//!
//! FIFO holding area for requests deferred by a limited bucket. The queue
//! never dispatches on its own: its bucket drains it through [`RateLimitQueue::free`]
//! with the bucket's admission check, so ordering is preserved end-to-end and
//! capacity consumed concurrently by fresh callers is respected.

use crate::error::ApiError;
use crate::rest::request::{ApiRequest, BucketKey};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};

/// What happens when a bounded queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail the send with [`ApiError::QueueFull`]
    #[default]
    Reject,
    /// Wait until a slot frees up
    Block,
}

/// Queue bound; `max_depth: None` means unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLimits {
    pub max_depth: Option<usize>,
    pub overflow: OverflowPolicy,
}

pub(crate) type Reply = oneshot::Sender<Result<Option<Value>, ApiError>>;

/// A deferred request and the pending result of its caller
pub(crate) struct QueuedRequest {
    pub(crate) request: ApiRequest,
    pub(crate) reply: Reply,
    /// Released when the request leaves the queue
    _slot: Option<OwnedSemaphorePermit>,
}

/// FIFO queue owned by one bucket
pub struct RateLimitQueue {
    items: Mutex<VecDeque<QueuedRequest>>,
    limits: QueueLimits,
    slots: Option<Arc<Semaphore>>,
}

impl RateLimitQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            limits,
            slots: limits.max_depth.map(|max| Arc::new(Semaphore::new(max))),
        }
    }

    /// Number of requests waiting
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    /// Reserve a slot ahead of [`add`](Self::add)
    ///
    /// Unbounded queues never wait. Bounded queues reject or wait per the
    /// overflow policy.
    pub(crate) async fn reserve(
        &self,
        key: &BucketKey,
    ) -> Result<Option<OwnedSemaphorePermit>, ApiError> {
        let (Some(slots), Some(max)) = (&self.slots, self.limits.max_depth) else {
            return Ok(None);
        };

        let full = || ApiError::QueueFull {
            route: key.route,
            method: key.method.clone(),
            depth: self.len(),
            max,
        };

        match self.limits.overflow {
            OverflowPolicy::Reject => Arc::clone(slots)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| full()),
            OverflowPolicy::Block => Arc::clone(slots)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| full()),
        }
    }

    /// Append a request to the tail
    ///
    /// The returned future settles once the request has been dispatched and
    /// answered, with whatever the eventual send produced.
    pub(crate) fn add(
        &self,
        key: &BucketKey,
        request: ApiRequest,
        slot: Option<OwnedSemaphorePermit>,
    ) -> impl Future<Output = Result<Option<Value>, ApiError>> + Send + 'static {
        let (reply, pending) = oneshot::channel();
        self.items.lock().push_back(QueuedRequest {
            request,
            reply,
            _slot: slot,
        });

        let route = key.route;
        let method = key.method.clone();
        async move {
            pending
                .await
                .unwrap_or(Err(ApiError::Abandoned { route, method }))
        }
    }

    /// Drain from the head while `admit` grants capacity
    ///
    /// Stops at the first refusal, leaving that item and everything behind it
    /// in place.
    pub(crate) fn free(&self, mut admit: impl FnMut() -> bool) -> Vec<QueuedRequest> {
        let mut items = self.items.lock();
        let mut released = Vec::new();

        while !items.is_empty() && admit() {
            if let Some(item) = items.pop_front() {
                released.push(item);
            }
        }

        released
    }
}
