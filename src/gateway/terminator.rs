//! Cross-shard kill switch
//!
//! A fatal condition observed anywhere (a 401 from the REST governor, a fatal
//! close code on one shard) tears down every shard sharing the token. The
//! switch latches, so shards spawned afterwards stop immediately.

use crate::gateway::close_code::GatewayCloseCode;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

#[derive(Debug, Clone)]
pub struct Terminator {
    tx: broadcast::Sender<GatewayCloseCode>,
    tripped: Arc<Mutex<Option<GatewayCloseCode>>>,
}

impl Default for Terminator {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            tripped: Arc::new(Mutex::new(None)),
        }
    }

    /// Instruct every subscribed shard to disconnect with `code`
    ///
    /// Returns the number of shards reached.
    pub fn terminate_all(&self, code: GatewayCloseCode) -> usize {
        self.tripped.lock().get_or_insert(code);
        let reached = self.tx.send(code).unwrap_or(0);
        error!(
            close_code = code.code(),
            reason = code.description(),
            shards = reached,
            "Terminating all gateway connections"
        );
        reached
    }

    /// Close code of the first termination, if any
    pub fn tripped(&self) -> Option<GatewayCloseCode> {
        *self.tripped.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayCloseCode> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_reaches_every_subscriber() {
        let terminator = Terminator::new();
        let mut a = terminator.subscribe();
        let mut b = terminator.clone().subscribe();

        assert_eq!(terminator.terminate_all(GatewayCloseCode::AuthenticationFailed), 2);
        assert_eq!(a.recv().await.unwrap(), GatewayCloseCode::AuthenticationFailed);
        assert_eq!(b.recv().await.unwrap(), GatewayCloseCode::AuthenticationFailed);
    }

    #[test]
    fn test_terminate_latches_first_code() {
        let terminator = Terminator::new();
        assert_eq!(terminator.tripped(), None);
        assert_eq!(terminator.terminate_all(GatewayCloseCode::InvalidShard), 0);
        terminator.terminate_all(GatewayCloseCode::AuthenticationFailed);
        assert_eq!(terminator.tripped(), Some(GatewayCloseCode::InvalidShard));
    }
}
