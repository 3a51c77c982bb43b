//! Rate-limited REST API client
//!
//! - `route`: endpoint templates and rendered paths
//! - `request`: request description and bucket key
//! - `headers`: rate-limit header parsing
//! - `response`: status classification
//! - `queue`: FIFO of deferred requests
//! - `bucket`: per-route limiter state machine
//! - `transport`: HTTP collaborator (reqwest in production)
//! - `client`: bucket registry

mod bucket;
mod client;
mod headers;
mod queue;
mod request;
mod response;
mod route;
mod transport;

pub use bucket::{BucketSnapshot, Capacity, RateLimitBucket};
pub use client::RestClient;
pub use headers::{names as header_names, RateLimitHeaders};
pub use queue::{OverflowPolicy, QueueLimits, RateLimitQueue};
pub use request::{ApiRequest, BucketKey, RequestFile};
pub use response::{classify, VALID_CODES};
pub use route::{Route, CURRENT_USER};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
