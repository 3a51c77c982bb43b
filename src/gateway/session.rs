//! Shard session state machine
//!
//! Pure bookkeeping, no I/O. The shard runner feeds it gateway events and
//! acts on the decisions it returns.
//!
//! ```text
//! Idle → Connecting → Identifying ──READY──▶ Ready
//!                                              │ close / missed acks
//!                                              ▼
//!                                         Reconnecting
//!                     resumable + known ─┐     │ otherwise
//!                                        ▼     ▼
//!                      Resuming ──RESUMED──▶ Ready ◀── Identifying
//!
//! fatal close (any state) → Terminated
//! ```

use crate::gateway::close_code::{classify, CloseClass, GatewayCloseCode};
use serde::Serialize;

/// Connection state of one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Identifying,
    Resuming,
    Ready,
    Reconnecting,
    Terminated,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Terminated => "terminated",
        }
    }

    /// Connected and receiving events, or in the middle of a resume
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Ready | Self::Resuming)
    }
}

/// Handshake to perform after Hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

/// Decision taken when a connection ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPlan {
    Resume,
    Reidentify,
    Terminate(GatewayCloseCode),
}

/// Session bookkeeping for one shard
#[derive(Debug, Clone)]
pub struct ShardSession {
    state: SessionState,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    resume_next: bool,
}

impl Default for ShardSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            sequence: None,
            resume_url: None,
            resume_next: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Both halves required for a resume are known
    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// URL to dial for the next connection
    pub fn connect_url<'a>(&'a self, default: &'a str) -> &'a str {
        match (&self.resume_url, self.resume_next && self.can_resume()) {
            (Some(url), true) => url,
            _ => default,
        }
    }

    pub fn begin_connect(&mut self) {
        if self.state != SessionState::Terminated {
            self.state = SessionState::Connecting;
        }
    }

    /// Choose the handshake once the gateway said Hello
    pub fn handshake(&mut self) -> Handshake {
        if self.resume_next {
            if let (Some(session_id), Some(sequence)) = (&self.session_id, self.sequence) {
                self.state = SessionState::Resuming;
                return Handshake::Resume {
                    session_id: session_id.clone(),
                    sequence,
                };
            }
        }

        self.discard();
        self.state = SessionState::Identifying;
        Handshake::Identify
    }

    pub fn record_sequence(&mut self, sequence: u64) {
        self.sequence = Some(self.sequence.map_or(sequence, |seen| seen.max(sequence)));
    }

    pub fn on_ready(&mut self, session_id: String, resume_url: Option<String>) {
        self.session_id = Some(session_id);
        self.resume_url = resume_url;
        self.resume_next = false;
        self.state = SessionState::Ready;
    }

    pub fn on_resumed(&mut self) {
        self.resume_next = false;
        self.state = SessionState::Ready;
    }

    /// The connection ended, with or without a close frame
    pub fn on_close(&mut self, code: Option<u16>) -> ReconnectPlan {
        match classify(code) {
            CloseClass::Fatal => {
                let fatal = code
                    .and_then(GatewayCloseCode::from_code)
                    .unwrap_or(GatewayCloseCode::AuthenticationFailed);
                self.terminate();
                ReconnectPlan::Terminate(fatal)
            }
            CloseClass::Resumable => self.reconnect(true),
            CloseClass::Reidentify => self.reconnect(false),
        }
    }

    /// Too many heartbeats went unacknowledged
    pub fn on_heartbeat_timeout(&mut self) -> ReconnectPlan {
        self.reconnect(true)
    }

    /// The gateway asked for a reconnect (op 7)
    pub fn on_reconnect_request(&mut self) -> ReconnectPlan {
        self.reconnect(true)
    }

    /// Invalid session (op 9); `resumable` is its payload
    pub fn on_invalid_session(&mut self, resumable: bool) -> ReconnectPlan {
        self.reconnect(resumable)
    }

    pub fn terminate(&mut self) {
        self.discard();
        self.state = SessionState::Terminated;
    }

    fn reconnect(&mut self, resumable: bool) -> ReconnectPlan {
        if self.state == SessionState::Terminated {
            return ReconnectPlan::Terminate(GatewayCloseCode::AuthenticationFailed);
        }

        self.state = SessionState::Reconnecting;
        if resumable && self.can_resume() {
            self.resume_next = true;
            ReconnectPlan::Resume
        } else {
            self.discard();
            ReconnectPlan::Reidentify
        }
    }

    fn discard(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
        self.resume_next = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_session() -> ShardSession {
        let mut session = ShardSession::new();
        session.begin_connect();
        assert_eq!(session.handshake(), Handshake::Identify);
        session.record_sequence(1);
        session.on_ready("abc".into(), Some("wss://resume.example".into()));
        session.record_sequence(5);
        session
    }

    #[test]
    fn test_fresh_session_identifies() {
        let mut session = ShardSession::new();
        assert_eq!(session.state(), SessionState::Idle);
        session.begin_connect();
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.handshake(), Handshake::Identify);
        assert_eq!(session.state(), SessionState::Identifying);
    }

    #[test]
    fn test_resumable_close_resumes() {
        let mut session = ready_session();
        assert_eq!(session.on_close(Some(4000)), ReconnectPlan::Resume);
        assert_eq!(session.state(), SessionState::Reconnecting);
        assert_eq!(session.connect_url("wss://default"), "wss://resume.example");

        session.begin_connect();
        assert_eq!(
            session.handshake(),
            Handshake::Resume {
                session_id: "abc".into(),
                sequence: 5
            }
        );
        assert_eq!(session.state(), SessionState::Resuming);

        session.on_resumed();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.connect_url("wss://default"), "wss://default");
    }

    #[test]
    fn test_dropped_socket_resumes() {
        let mut session = ready_session();
        assert_eq!(session.on_close(None), ReconnectPlan::Resume);
    }

    #[test]
    fn test_reidentify_close_discards_session() {
        let mut session = ready_session();
        assert_eq!(session.on_close(Some(4009)), ReconnectPlan::Reidentify);
        assert_eq!(session.session_id(), None);
        assert_eq!(session.sequence(), None);

        session.begin_connect();
        assert_eq!(session.handshake(), Handshake::Identify);
    }

    #[test]
    fn test_normal_close_reidentifies() {
        let mut session = ready_session();
        assert_eq!(session.on_close(Some(1000)), ReconnectPlan::Reidentify);
    }

    #[test]
    fn test_resumable_close_without_session_reidentifies() {
        let mut session = ShardSession::new();
        session.begin_connect();
        session.handshake();
        assert_eq!(session.on_close(Some(4000)), ReconnectPlan::Reidentify);
    }

    #[test]
    fn test_fatal_close_terminates() {
        let mut session = ready_session();
        assert_eq!(
            session.on_close(Some(4004)),
            ReconnectPlan::Terminate(GatewayCloseCode::AuthenticationFailed)
        );
        assert_eq!(session.state(), SessionState::Terminated);

        // Terminated is absorbing
        session.begin_connect();
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(matches!(session.on_close(Some(4000)), ReconnectPlan::Terminate(_)));
    }

    #[test]
    fn test_heartbeat_timeout_takes_resumable_path() {
        let mut session = ready_session();
        assert_eq!(session.on_heartbeat_timeout(), ReconnectPlan::Resume);
    }

    #[test]
    fn test_invalid_session() {
        let mut session = ready_session();
        assert_eq!(session.on_invalid_session(true), ReconnectPlan::Resume);

        let mut session = ready_session();
        assert_eq!(session.on_invalid_session(false), ReconnectPlan::Reidentify);
        assert!(!session.can_resume());
    }

    #[test]
    fn test_sequence_never_goes_backwards() {
        let mut session = ready_session();
        session.record_sequence(3);
        assert_eq!(session.sequence(), Some(5));
    }
}
