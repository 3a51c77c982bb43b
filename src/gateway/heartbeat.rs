//! Heartbeat bookkeeping

use std::time::Duration;
use tokio::time::Instant;

/// Consecutive unacknowledged heartbeats that kill a connection
pub const MAX_MISSED_ACKS: u32 = 2;

/// Outcome of a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now
    Send,
    /// The connection is a zombie; reconnect
    Failed,
}

#[derive(Debug, Clone)]
pub struct Heartbeater {
    interval: Duration,
    awaiting_ack: bool,
    missed: u32,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
}

impl Heartbeater {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            awaiting_ack: false,
            missed: 0,
            last_sent: None,
            last_ack: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Called on every interval tick
    pub fn on_tick(&mut self) -> Beat {
        if self.awaiting_ack {
            self.missed += 1;
            if self.missed >= MAX_MISSED_ACKS {
                return Beat::Failed;
            }
        }

        self.mark_sent();
        Beat::Send
    }

    /// A heartbeat went out outside the regular schedule
    pub fn mark_sent(&mut self) {
        self.awaiting_ack = true;
        self.last_sent = Some(Instant::now());
    }

    /// Returns the round-trip latency of the acknowledged heartbeat
    pub fn record_ack(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.awaiting_ack = false;
        self.missed = 0;
        self.last_ack = Some(now);
        self.last_sent.map(|sent| now.duration_since(sent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acked_heartbeats_never_fail() {
        let mut heart = Heartbeater::new(Duration::from_millis(100));
        for _ in 0..5 {
            assert_eq!(heart.on_tick(), Beat::Send);
            tokio::time::advance(Duration::from_millis(20)).await;
            assert_eq!(heart.record_ack(), Some(Duration::from_millis(20)));
        }
        assert_eq!(heart.missed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_missed_acks_fail() {
        let mut heart = Heartbeater::new(Duration::from_millis(100));
        assert_eq!(heart.on_tick(), Beat::Send);
        // First ack missed
        assert_eq!(heart.on_tick(), Beat::Send);
        // Second ack missed
        assert_eq!(heart.on_tick(), Beat::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_resets_missed_count() {
        let mut heart = Heartbeater::new(Duration::from_millis(100));
        heart.on_tick();
        heart.on_tick();
        assert_eq!(heart.missed(), 1);
        heart.record_ack();
        assert_eq!(heart.on_tick(), Beat::Send);
        assert_eq!(heart.on_tick(), Beat::Send);
    }
}
