//! Prometheus metrics module
//!
//! Recording goes through the `metrics` facade, so [`ClientMetrics`] works
//! with or without an installed recorder. [`MetricsExporter`] installs the
//! Prometheus recorder and renders the scrape output.

use crate::error::GatewayError;
use crate::gateway::SessionState;
use crate::rest::BucketKey;
use http::StatusCode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Client metrics collector
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMetrics;

impl ClientMetrics {
    pub fn new() -> Self {
        Self
    }

    /// Register metric descriptions
    fn register_metrics() {
        // REST governor
        describe_counter!(
            "rest_requests_total",
            Unit::Count,
            "REST requests answered by the platform"
        );
        describe_histogram!(
            "rest_request_duration_seconds",
            Unit::Seconds,
            "Round-trip time of REST requests"
        );
        describe_counter!(
            "rest_requests_queued_total",
            Unit::Count,
            "Requests deferred by a limited bucket"
        );
        describe_gauge!(
            "rest_queue_depth",
            Unit::Count,
            "Requests waiting in a bucket queue"
        );
        describe_counter!(
            "rest_bucket_refills_total",
            Unit::Count,
            "Bucket refill timers fired"
        );
        describe_counter!(
            "rest_errors_total",
            Unit::Count,
            "REST errors surfaced to callers"
        );

        // Gateway
        describe_counter!(
            "gateway_events_received_total",
            Unit::Count,
            "Dispatch events received from the gateway"
        );
        describe_counter!(
            "gateway_state_transitions_total",
            Unit::Count,
            "Shard session state transitions"
        );
        describe_counter!(
            "gateway_reconnects_total",
            Unit::Count,
            "Shard reconnects by mode (resume/identify)"
        );
        describe_histogram!(
            "gateway_heartbeat_latency_seconds",
            Unit::Seconds,
            "Time between heartbeat and acknowledgement"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total gateway errors"
        );
        describe_gauge!(
            "gateway_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
    }

    /// Record an answered REST request
    pub fn record_request(&self, key: &BucketKey, status: StatusCode, duration: Duration) {
        counter!(
            "rest_requests_total",
            "route" => key.route,
            "method" => key.method.to_string(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);

        histogram!(
            "rest_request_duration_seconds",
            "route" => key.route,
            "method" => key.method.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a request deferred into a bucket queue
    pub fn record_queued(&self, key: &BucketKey, depth: usize) {
        counter!(
            "rest_requests_queued_total",
            "route" => key.route,
            "method" => key.method.to_string()
        )
        .increment(1);
        self.set_queue_depth(key, depth);
    }

    /// Set the current queue depth of a bucket
    pub fn set_queue_depth(&self, key: &BucketKey, depth: usize) {
        gauge!(
            "rest_queue_depth",
            "route" => key.route,
            "method" => key.method.to_string()
        )
        .set(depth as f64);
    }

    /// Record a bucket refill
    pub fn record_refill(&self, key: &BucketKey) {
        counter!(
            "rest_bucket_refills_total",
            "route" => key.route,
            "method" => key.method.to_string()
        )
        .increment(1);
    }

    /// Record a REST error surfaced to a caller
    pub fn record_api_error(&self, key: &BucketKey, error_type: &'static str) {
        counter!(
            "rest_errors_total",
            "route" => key.route,
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Record a dispatch event received
    pub fn record_event(&self, shard_id: u32, event_type: &str) {
        counter!(
            "gateway_events_received_total",
            "shard_id" => shard_id.to_string(),
            "event_type" => event_type.to_owned()
        )
        .increment(1);
    }

    /// Record a session state transition
    pub fn record_state(&self, shard_id: u32, state: SessionState) {
        counter!(
            "gateway_state_transitions_total",
            "shard_id" => shard_id.to_string(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    /// Record a reconnect
    pub fn record_reconnect(&self, shard_id: u32, resume: bool) {
        counter!(
            "gateway_reconnects_total",
            "shard_id" => shard_id.to_string(),
            "mode" => if resume { "resume" } else { "identify" }
        )
        .increment(1);
    }

    /// Record heartbeat acknowledgement latency
    pub fn record_heartbeat(&self, shard_id: u32, latency: Duration) {
        histogram!(
            "gateway_heartbeat_latency_seconds",
            "shard_id" => shard_id.to_string()
        )
        .record(latency.as_secs_f64());
    }

    /// Record gateway error with error type label
    pub fn record_error(&self, shard_id: u32, error_type: &'static str) {
        counter!(
            "gateway_errors_total",
            "shard_id" => shard_id.to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Set shards ready count
    pub fn set_shards_ready(&self, count: usize) {
        gauge!("gateway_shards_ready").set(count as f64);
    }
}

/// Installed Prometheus recorder
#[derive(Clone)]
pub struct MetricsExporter {
    handle: Arc<PrometheusHandle>,
}

impl MetricsExporter {
    /// Install the global Prometheus recorder
    ///
    /// Only one recorder can be installed per process.
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::MetricsInstall(Box::new(e)))?;

        ClientMetrics::register_metrics();

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
