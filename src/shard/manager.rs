//! Shard manager
//!
//! Creates every shard of the deployment, staggers their startup and routes
//! manager messages to them. Each shard runs as an isolated task; the manager
//! only holds the command sender and the task handle.

use crate::config::{ClientConfig, DEFAULT_GATEWAY_URL};
use crate::error::GatewayError;
use crate::events::ShardEvent;
use crate::gateway::{GatewayTransport, Terminator};
use crate::metrics::ClientMetrics;
use crate::shard::message::{ShardCommand, ShardMessage};
use crate::shard::runner::ShardRunner;
use crate::shard::state::ShardState;
use futures_util::future::{join_all, try_join_all};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use twilight_model::gateway::{Intents, ShardId};

/// Default delay before a reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Per-deployment shard settings
#[derive(Debug, Clone)]
pub struct ShardSettings {
    pub token: String,
    pub total_shards: u32,
    pub intents: Intents,
    pub gateway_url: String,
    /// Base of the reconnect backoff
    pub reconnect_delay: Duration,
    /// Pending manager messages per shard
    pub command_buffer: usize,
    /// Pending events relayed to the application
    pub event_buffer: usize,
}

impl ShardSettings {
    pub fn new(token: impl Into<String>, total_shards: u32) -> Self {
        Self {
            token: token.into(),
            total_shards,
            intents: Intents::GUILDS,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            command_buffer: 32,
            event_buffer: 1024,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            intents: config.intents,
            gateway_url: config.gateway_url.clone(),
            reconnect_delay: config.reconnect_delay,
            ..Self::new(config.discord_token.clone(), config.total_shards)
        }
    }
}

struct ShardHandle {
    commands: mpsc::Sender<ShardCommand>,
    task: JoinHandle<Result<(), GatewayError>>,
}

/// Owns every shard of one bot token
pub struct ShardManager<T: GatewayTransport> {
    settings: Arc<ShardSettings>,
    transport: Arc<T>,
    shards: RwLock<BTreeMap<u32, ShardHandle>>,
    terminator: Terminator,
    state: ShardState,
    events: mpsc::Sender<ShardEvent>,
    metrics: ClientMetrics,
    started: AtomicBool,
}

impl<T: GatewayTransport> ShardManager<T> {
    /// Create a manager; the receiver yields every relayed shard event
    pub fn new(settings: ShardSettings, transport: T) -> (Self, mpsc::Receiver<ShardEvent>) {
        let (events, receiver) = mpsc::channel(settings.event_buffer.max(1));
        let state = ShardState::new(settings.total_shards);

        let manager = Self {
            settings: Arc::new(settings),
            transport: Arc::new(transport),
            shards: RwLock::new(BTreeMap::new()),
            terminator: Terminator::new(),
            state,
            events,
            metrics: ClientMetrics::new(),
            started: AtomicBool::new(false),
        };
        (manager, receiver)
    }

    /// Kill switch shared with the REST governor
    pub fn terminator(&self) -> Terminator {
        self.terminator.clone()
    }

    /// Shared state (for health checks)
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    pub fn total_shards(&self) -> u32 {
        self.settings.total_shards
    }

    /// Ids of the shards spawned so far
    pub fn shard_ids(&self) -> Vec<u32> {
        self.shards.read().keys().copied().collect()
    }

    /// Spawn every shard in id order, waiting `spawn_interval` between two
    ///
    /// Returns once the last shard has been spawned. Stops early if a fatal
    /// condition trips the terminator mid-way.
    pub async fn start(&self, spawn_interval: Duration) -> Result<(), GatewayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyStarted);
        }

        let total = self.settings.total_shards;
        info!(total_shards = total, spawn_interval_ms = spawn_interval.as_millis() as u64, "Starting shards");

        for shard_id in 0..total {
            if self.terminator.tripped().is_some() {
                warn!(shard_id, "Fatal condition during startup, not spawning remaining shards");
                return Err(GatewayError::Terminated { shard_id });
            }

            self.spawn(shard_id)?;

            if shard_id + 1 < total {
                tokio::time::sleep(spawn_interval).await;
            }
        }

        info!(total_shards = total, "All shards spawned");
        Ok(())
    }

    fn spawn(&self, shard_id: u32) -> Result<(), GatewayError> {
        let total = self.settings.total_shards;
        let shard = ShardId::new_checked(shard_id, total).ok_or_else(|| {
            GatewayError::Config(format!("shard id {shard_id} is out of range for {total} shards"))
        })?;

        let (commands, receiver) = mpsc::channel(self.settings.command_buffer.max(1));
        let runner = ShardRunner::new(
            shard,
            Arc::clone(&self.settings),
            Arc::clone(&self.transport),
            receiver,
            self.terminator.clone(),
            self.events.clone(),
            self.state.clone(),
            self.metrics,
        );

        let mut shards = self.shards.write();
        self.state.register(shard_id);
        info!(shard_id, total_shards = total, "Spawning shard");

        let task = tokio::spawn(async move {
            let result = runner.run().await;
            if let Err(e) = &result {
                error!(shard_id, error = %e, "Shard task failed");
            }
            result
        });
        shards.insert(shard_id, ShardHandle { commands, task });
        Ok(())
    }

    /// Send a message to every shard and collect the replies in id order
    ///
    /// Every shard receives the message; any single failure fails the
    /// aggregate.
    pub async fn broadcast(&self, message: ShardMessage) -> Result<Vec<Value>, GatewayError> {
        let targets: Vec<_> = self
            .shards
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.commands.clone()))
            .collect();

        // Delivery to one shard never waits on another
        let pending = join_all(
            targets
                .into_iter()
                .map(|(shard_id, commands)| Self::deliver(shard_id, commands, message.clone())),
        )
        .await;

        try_join_all(pending).await
    }

    /// Send a message to one shard
    ///
    /// Returns `None` when no shard has that id.
    pub async fn send(
        &self,
        message: ShardMessage,
        shard_id: u32,
    ) -> Option<Result<Value, GatewayError>> {
        let commands = self.shards.read().get(&shard_id)?.commands.clone();
        Some(Self::deliver(shard_id, commands, message).await.await)
    }

    /// Hand the message to the shard, returning the pending reply
    async fn deliver(
        shard_id: u32,
        commands: mpsc::Sender<ShardCommand>,
        message: ShardMessage,
    ) -> impl std::future::Future<Output = Result<Value, GatewayError>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        let sent = commands.send(ShardCommand { message, reply }).await.is_ok();

        async move {
            if !sent {
                return Err(GatewayError::ShardUnavailable { shard_id });
            }
            response
                .await
                .unwrap_or(Err(GatewayError::ShardUnavailable { shard_id }))
        }
    }

    /// Stop every shard and wait for their tasks
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.shards.write());
        info!(shards = handles.len(), "Shutting down shards");

        // Dropping the senders stops each runner
        let tasks: Vec<_> = handles
            .into_iter()
            .map(|(shard_id, handle)| {
                drop(handle.commands);
                async move { (shard_id, handle.task.await) }
            })
            .collect();

        for (shard_id, joined) in join_all(tasks).await {
            if let Err(e) = joined {
                warn!(shard_id, error = %e, "Shard task panicked or was cancelled");
            }
        }
        info!("All shards stopped");
    }
}
