//! Arrakis Client - sharded gateway runner with a rate-limited REST client
//!
//! - Spawns every configured shard with the recommended stagger
//! - Relays gateway events and looks up the channels of joined guilds
//! - Exposes health/ready endpoints for Kubernetes
//! - Exports Prometheus metrics for observability

use anyhow::Result;
use arrakis_client::events::ShardEvent;
use arrakis_client::gateway::WsTransport;
use arrakis_client::health::{self, AppState};
use arrakis_client::metrics::MetricsExporter;
use arrakis_client::rest::{ApiRequest, ReqwestTransport, Route};
use arrakis_client::{ApiError, ClientConfig, RestClient, ShardManager, ShardSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = ClientConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("arrakis_client={}", config.log_level).parse()?)
                .add_directive("tungstenite=warn".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        total_shards = config.total_shards,
        intents = config.intents.bits(),
        "Starting Arrakis client"
    );

    let exporter = match MetricsExporter::install() {
        Ok(exporter) => {
            info!("Prometheus metrics initialized");
            Some(exporter)
        }
        Err(e) => {
            error!(error = %e, "Failed to install metrics exporter");
            None
        }
    };

    let (manager, events) = ShardManager::new(ShardSettings::from_config(&config), WsTransport);
    let manager = Arc::new(manager);

    let rest = Arc::new(
        RestClient::new(ReqwestTransport::new(&config).map_err(|e| anyhow::anyhow!(e))?)
            .with_queue_limits(config.queue_limits)
            .with_terminator(manager.terminator()),
    );

    let app_state = AppState {
        shard_state: manager.state(),
        exporter,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    info!(port = config.http_port, "Starting HTTP server");
    let http_server = axum::serve(tokio::net::TcpListener::bind(addr).await?, health::router(app_state));

    let shards = {
        let manager = Arc::clone(&manager);
        let spawn_interval = config.spawn_interval;
        async move {
            manager.start(spawn_interval).await?;
            std::future::pending::<Result<(), arrakis_client::GatewayError>>().await
        }
    };

    tokio::select! {
        result = shards => {
            if let Err(e) = result {
                error!(error = %e, "Shard startup failed");
            }
        }
        _ = relay_events(events, Arc::clone(&rest)) => {
            info!("Event stream closed");
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down client...");
    manager.shutdown().await;
    info!("Client shutdown complete");
    Ok(())
}

/// Consume relayed shard events until every shard is gone
async fn relay_events(
    mut events: mpsc::Receiver<ShardEvent>,
    rest: Arc<RestClient<ReqwestTransport>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ShardEvent::Dispatch(event) if event.event_type == "guild.join" => {
                let Some(guild_id) = event.guild_id.as_deref().and_then(|id| id.parse().ok()) else {
                    continue;
                };
                let rest = Arc::clone(&rest);
                tokio::spawn(async move {
                    match rest.send(ApiRequest::get(Route::GuildChannels { guild_id })).await {
                        Ok(body) => {
                            let channels = body.as_ref().and_then(|b| b.as_array()).map_or(0, Vec::len);
                            info!(guild_id, channels, "Guild joined");
                        }
                        Err(e @ ApiError::Unauthorized { .. }) => error!(guild_id, error = %e, "Credential rejected"),
                        Err(e) => warn!(guild_id, error = %e, "Failed to list guild channels"),
                    }
                });
            }
            ShardEvent::Dispatch(event) => {
                debug!(shard_id = event.shard_id, event_type = %event.event_type, "Gateway event");
            }
            ShardEvent::StateChanged { shard_id, state } => {
                info!(shard_id, state = state.as_str(), "Shard state changed");
            }
            ShardEvent::Terminated {
                shard_id,
                close_code,
            } => {
                warn!(shard_id, close_code = ?close_code, "Shard terminated");
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
