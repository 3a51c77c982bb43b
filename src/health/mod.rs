//! Health check endpoints

use crate::metrics::MetricsExporter;
use crate::shard::ShardState;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub shards_terminated: usize,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub shards_total: u32,
    pub shards_spawned: usize,
    pub shards_ready: usize,
    pub guilds_total: u64,
    pub events_received: u64,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub shard_state: ShardState,
    pub exporter: Option<MetricsExporter>,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - 200 unless every shard has been terminated
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shards = &state.shard_state;
    let terminated = shards.terminated_shards();
    let dead = shards.shard_count() > 0 && terminated == shards.shard_count();

    let response = HealthResponse {
        status: if dead { "terminated" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        shards_terminated: terminated,
    };

    if dead {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    } else {
        (StatusCode::OK, Json(response))
    }
}

/// Readiness endpoint - returns 200 if at least one shard is ready
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shards = &state.shard_state;
    let response = ReadyResponse {
        ready: shards.is_ready(),
        shards_total: shards.total_shards(),
        shards_spawned: shards.shard_count(),
        shards_ready: shards.ready_shards(),
        guilds_total: shards.total_guilds(),
        events_received: shards.total_events_received(),
    };

    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.exporter {
        Some(exporter) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            exporter.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics exporter not installed\n".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SessionState;

    fn state(shards: &[SessionState]) -> AppState {
        let shard_state = ShardState::new(shards.len() as u32);
        for (id, session) in shards.iter().enumerate() {
            shard_state.register(id as u32);
            shard_state.set_state(id as u32, *session);
        }
        AppState {
            shard_state,
            exporter: None,
        }
    }

    #[tokio::test]
    async fn test_ready_requires_a_ready_shard() {
        let response = ready_handler(State(state(&[SessionState::Identifying])))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ready_handler(State(state(&[
            SessionState::Ready,
            SessionState::Reconnecting,
        ])))
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_fails_when_all_shards_terminated() {
        let response = health_handler(State(state(&[SessionState::Terminated])))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = health_handler(State(state(&[]))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_ready_response_serialization() {
        let response = ReadyResponse {
            ready: true,
            shards_total: 3,
            shards_spawned: 3,
            shards_ready: 3,
            guilds_total: 1000,
            events_received: 12,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"ready\":true"));
    }
}
