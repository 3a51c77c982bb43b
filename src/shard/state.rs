//! Shard state tracking
//!
//! Mirror of every shard's session state for health checks. Only the shard's
//! own task writes its entry.

use crate::gateway::SessionState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State for a single shard
#[derive(Debug)]
pub struct ShardStateEntry {
    pub state: SessionState,
    pub guilds: u64,
    pub events_received: AtomicU64,
    pub reconnects: AtomicU64,
    pub last_heartbeat: Option<Instant>,
    pub latency: Option<Duration>,
    pub connected_at: Option<Instant>,
}

impl Default for ShardStateEntry {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            guilds: 0,
            events_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_heartbeat: None,
            latency: None,
            connected_at: None,
        }
    }
}

/// Shared state across all shards of a manager
#[derive(Debug, Clone)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug)]
struct ShardStateInner {
    shards: DashMap<u32, ShardStateEntry>,
    total_shards: u32,
}

impl ShardState {
    pub fn new(total_shards: u32) -> Self {
        Self {
            inner: Arc::new(ShardStateInner {
                shards: DashMap::new(),
                total_shards,
            }),
        }
    }

    pub fn total_shards(&self) -> u32 {
        self.inner.total_shards
    }

    /// Start tracking a shard
    pub fn register(&self, shard_id: u32) {
        self.inner.shards.entry(shard_id).or_default();
    }

    pub fn set_state(&self, shard_id: u32, state: SessionState) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.state = state;
            match state {
                SessionState::Ready if entry.connected_at.is_none() => {
                    entry.connected_at = Some(Instant::now());
                }
                SessionState::Reconnecting | SessionState::Terminated => entry.connected_at = None,
                _ => {}
            }
        }
    }

    pub fn set_guilds(&self, shard_id: u32, count: u64) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.guilds = count;
        }
    }

    pub fn record_event(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.events_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect(&self, shard_id: u32) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_heartbeat(&self, shard_id: u32, latency: Option<Duration>) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.last_heartbeat = Some(Instant::now());
            entry.latency = latency;
        }
    }

    pub fn get_state(&self, shard_id: u32) -> Option<SessionState> {
        self.inner.shards.get(&shard_id).map(|e| e.state)
    }

    pub fn latency(&self, shard_id: u32) -> Option<Duration> {
        self.inner.shards.get(&shard_id).and_then(|e| e.latency)
    }

    pub fn reconnects(&self, shard_id: u32) -> u64 {
        self.inner
            .shards
            .get(&shard_id)
            .map(|e| e.reconnects.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get total events received across all shards
    pub fn total_events_received(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_received.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_guilds(&self) -> u64 {
        self.inner.shards.iter().map(|e| e.guilds).sum()
    }

    pub fn ready_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.state == SessionState::Ready)
            .count()
    }

    /// Count of shards that are ready or resuming
    pub fn healthy_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.state.is_healthy())
            .count()
    }

    pub fn terminated_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.state == SessionState::Terminated)
            .count()
    }

    /// Shards spawned so far
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// At least one shard is ready
    pub fn is_ready(&self) -> bool {
        self.ready_shards() > 0
    }

    /// Every shard has been spawned and is healthy
    pub fn is_healthy(&self) -> bool {
        self.shard_count() == self.total_shards() as usize
            && self.healthy_shards() == self.shard_count()
    }
}
