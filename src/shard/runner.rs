//! Per-shard event loop
//!
//! One runner per shard, spawned as its own task. The runner is the only
//! writer of its session: it dials the gateway, performs the handshake,
//! keeps the heartbeat, relays dispatches and answers manager messages, both
//! while connected and while offline.

use crate::error::GatewayError;
use crate::events::{serialize_dispatch, ShardEvent};
use crate::gateway::payload::{self, HelloData, InboundFrame, ReadyData};
use crate::gateway::{
    Beat, GatewayCloseCode, GatewaySocket, GatewayTransport, Handshake, Heartbeater,
    ReconnectPlan, SessionState, ShardSession, SocketMessage, Terminator,
};
use crate::metrics::ClientMetrics;
use crate::shard::manager::ShardSettings;
use crate::shard::message::{events, ShardCommand};
use crate::shard::state::ShardState;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use twilight_model::gateway::{OpCode, ShardId};

/// Close code used when we drop a connection we intend to resume
const RESUME_CLOSE_CODE: u16 = 4000;
/// Close code used when we drop a connection for good
const NORMAL_CLOSE_CODE: u16 = 1000;
/// Upper bound of the reconnect backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Why a connection (or an offline wait) ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Dial again; the session knows whether to resume
    Reconnect,
    /// The manager is gone or shutting down
    Stop,
    /// This shard saw a fatal close code
    Fatal(GatewayCloseCode),
    /// Another component tripped the terminator
    Killed(GatewayCloseCode),
}

enum Offline<R> {
    Done(R),
    Interrupted(Outcome),
}

pub(crate) struct ShardRunner<T: GatewayTransport> {
    shard: ShardId,
    settings: Arc<ShardSettings>,
    transport: Arc<T>,
    session: ShardSession,
    heart: Option<Heartbeater>,
    ticker: Option<Interval>,
    commands: mpsc::Receiver<ShardCommand>,
    kill: broadcast::Receiver<GatewayCloseCode>,
    terminator: Terminator,
    events: mpsc::Sender<ShardEvent>,
    state: ShardState,
    metrics: ClientMetrics,
    /// Consecutive connections that did not reach Ready
    failures: u32,
}

impl<T: GatewayTransport> ShardRunner<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shard: ShardId,
        settings: Arc<ShardSettings>,
        transport: Arc<T>,
        commands: mpsc::Receiver<ShardCommand>,
        terminator: Terminator,
        events: mpsc::Sender<ShardEvent>,
        state: ShardState,
        metrics: ClientMetrics,
    ) -> Self {
        Self {
            shard,
            settings,
            transport,
            session: ShardSession::new(),
            heart: None,
            ticker: None,
            commands,
            kill: terminator.subscribe(),
            terminator,
            events,
            state,
            metrics,
            failures: 0,
        }
    }

    fn id(&self) -> u32 {
        self.shard.number()
    }

    pub(crate) async fn run(mut self) -> Result<(), GatewayError> {
        let shard_id = self.id();
        info!(shard_id, total_shards = self.shard.total(), "Shard starting");

        if let Some(code) = self.terminator.tripped() {
            return Err(self.killed(code));
        }

        loop {
            self.session.begin_connect();
            self.publish_state();

            let url = self
                .session
                .connect_url(&self.settings.gateway_url)
                .to_owned();
            let transport = Arc::clone(&self.transport);
            let shard = self.shard;

            let outcome = match self
                .offline(async move { transport.connect(shard, &url).await })
                .await
            {
                Offline::Done(Ok(socket)) => {
                    debug!(shard_id, "Gateway connection established");
                    self.drive(socket).await
                }
                Offline::Done(Err(source)) => {
                    warn!(shard_id, error = %source, "Failed to connect to gateway");
                    self.metrics.record_error(shard_id, "connect");
                    self.on_close(None)
                }
                Offline::Interrupted(outcome) => outcome,
            };

            let outcome = match outcome {
                Outcome::Reconnect => {
                    self.publish_state();
                    let delay = self.backoff();
                    debug!(shard_id, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                    match self.offline(tokio::time::sleep(delay)).await {
                        Offline::Done(()) => Outcome::Reconnect,
                        Offline::Interrupted(outcome) => outcome,
                    }
                }
                other => other,
            };

            match outcome {
                Outcome::Reconnect => continue,
                Outcome::Stop => {
                    self.session.terminate();
                    self.publish_state();
                    self.emit(ShardEvent::Terminated {
                        shard_id,
                        close_code: None,
                    });
                    info!(shard_id, "Shard stopped");
                    return Ok(());
                }
                Outcome::Fatal(code) => return Err(self.fatal(code)),
                Outcome::Killed(code) => return Err(self.killed(code)),
            }
        }
    }

    /// Run `fut` while no connection is up, still serving commands
    async fn offline<F: Future>(&mut self, fut: F) -> Offline<F::Output> {
        tokio::pin!(fut);

        loop {
            tokio::select! {
                output = &mut fut => return Offline::Done(output),
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(outcome) = self.handle_command(command, None).await {
                            return Offline::Interrupted(outcome);
                        }
                    }
                    None => return Offline::Interrupted(Outcome::Stop),
                },
                code = next_kill(&mut self.kill) => return Offline::Interrupted(Outcome::Killed(code)),
            }
        }
    }

    /// Serve one live connection until it ends
    async fn drive(&mut self, mut socket: T::Socket) -> Outcome {
        let shard_id = self.id();
        self.heart = None;
        self.ticker = None;

        loop {
            tokio::select! {
                message = socket.next_message() => match message {
                    Some(Ok(SocketMessage::Text(text))) => {
                        if let Some(outcome) = self.handle_frame(&mut socket, &text).await {
                            return outcome;
                        }
                    }
                    Some(Ok(SocketMessage::Close(code))) => {
                        info!(shard_id, close_code = ?code, "Gateway closed the connection");
                        return self.on_close(code);
                    }
                    Some(Err(source)) => {
                        warn!(shard_id, error = %source, "Gateway socket error");
                        self.metrics.record_error(shard_id, "socket");
                        return self.on_close(None);
                    }
                    None => {
                        warn!(shard_id, "Gateway stream ended without a close frame");
                        return self.on_close(None);
                    }
                },
                _ = next_tick(&mut self.ticker) => {
                    if let Some(outcome) = self.beat(&mut socket).await {
                        return outcome;
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(outcome) = self.handle_command(command, Some(&mut socket)).await {
                            return outcome;
                        }
                    }
                    None => {
                        let _ = socket.close(NORMAL_CLOSE_CODE).await;
                        return Outcome::Stop;
                    }
                },
                code = next_kill(&mut self.kill) => {
                    let _ = socket.close(code.code()).await;
                    return Outcome::Killed(code);
                }
            }
        }
    }

    async fn beat(&mut self, socket: &mut T::Socket) -> Option<Outcome> {
        let shard_id = self.id();
        let beat = self.heart.as_mut()?.on_tick();

        match beat {
            Beat::Send => {
                let frame = payload::heartbeat(self.session.sequence());
                if let Err(source) = socket.send(frame.to_string()).await {
                    warn!(shard_id, error = %source, "Failed to send heartbeat");
                    return Some(self.on_close(None));
                }
                None
            }
            Beat::Failed => {
                warn!(shard_id, "Heartbeat acks missed, reconnecting");
                self.metrics.record_error(shard_id, "heartbeat_timeout");
                let _ = socket.close(RESUME_CLOSE_CODE).await;
                let plan = self.session.on_heartbeat_timeout();
                Some(self.planned(plan))
            }
        }
    }

    async fn handle_frame(&mut self, socket: &mut T::Socket, text: &str) -> Option<Outcome> {
        let shard_id = self.id();

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(shard_id, error = %e, "Failed to decode gateway frame");
                self.metrics.record_error(shard_id, "decode");
                return None;
            }
        };

        if let Some(sequence) = frame.s {
            self.session.record_sequence(sequence);
        }

        match frame.opcode() {
            Some(OpCode::Hello) => self.on_hello(socket, frame.d).await,
            Some(OpCode::HeartbeatAck) => {
                if let Some(heart) = self.heart.as_mut() {
                    let latency = heart.record_ack();
                    if let Some(latency) = latency {
                        self.metrics.record_heartbeat(shard_id, latency);
                    }
                    self.state.record_heartbeat(shard_id, latency);
                }
                None
            }
            Some(OpCode::Heartbeat) => {
                let frame = payload::heartbeat(self.session.sequence());
                if let Err(source) = socket.send(frame.to_string()).await {
                    warn!(shard_id, error = %source, "Failed to answer heartbeat request");
                    return Some(self.on_close(None));
                }
                if let Some(heart) = self.heart.as_mut() {
                    heart.mark_sent();
                }
                None
            }
            Some(OpCode::Reconnect) => {
                info!(shard_id, "Gateway requested a reconnect");
                let _ = socket.close(RESUME_CLOSE_CODE).await;
                let plan = self.session.on_reconnect_request();
                Some(self.planned(plan))
            }
            Some(OpCode::InvalidSession) => {
                let resumable = frame.d.as_bool().unwrap_or(false);
                warn!(shard_id, resumable, "Gateway invalidated the session");
                let code = if resumable {
                    RESUME_CLOSE_CODE
                } else {
                    NORMAL_CLOSE_CODE
                };
                let _ = socket.close(code).await;
                let plan = self.session.on_invalid_session(resumable);
                Some(self.planned(plan))
            }
            Some(OpCode::Dispatch) => {
                self.on_dispatch(frame);
                None
            }
            _ => {
                debug!(shard_id, op = frame.op, "Ignoring gateway frame");
                None
            }
        }
    }

    async fn on_hello(&mut self, socket: &mut T::Socket, data: Value) -> Option<Outcome> {
        let shard_id = self.id();

        let hello: HelloData = match serde_json::from_value(data) {
            Ok(hello) => hello,
            Err(e) => {
                warn!(shard_id, error = %e, "Malformed hello frame");
                let _ = socket.close(RESUME_CLOSE_CODE).await;
                return Some(self.on_close(None));
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heart = Some(Heartbeater::new(interval));
        self.ticker = Some(ticker);

        let frame = match self.session.handshake() {
            Handshake::Identify => {
                info!(shard_id, "Identifying");
                payload::identify(&self.settings.token, self.settings.intents, self.shard)
            }
            Handshake::Resume {
                session_id,
                sequence,
            } => {
                info!(shard_id, %session_id, sequence, "Resuming session");
                payload::resume(&self.settings.token, &session_id, sequence)
            }
        };
        self.publish_state();

        if let Err(source) = socket.send(frame.to_string()).await {
            warn!(shard_id, error = %source, "Failed to send handshake");
            return Some(self.on_close(None));
        }
        None
    }

    fn on_dispatch(&mut self, frame: InboundFrame) {
        let shard_id = self.id();
        let Some(name) = frame.t else {
            return;
        };

        match name.as_str() {
            "READY" => match serde_json::from_value::<ReadyData>(frame.d.clone()) {
                Ok(ready) => {
                    info!(
                        shard_id,
                        guilds = ready.guilds.len(),
                        session_id = %ready.session_id,
                        "Shard ready"
                    );
                    self.state.set_guilds(shard_id, ready.guilds.len() as u64);
                    self.session
                        .on_ready(ready.session_id, ready.resume_gateway_url);
                    self.failures = 0;
                    self.publish_state();
                }
                Err(e) => warn!(shard_id, error = %e, "Malformed READY payload"),
            },
            "RESUMED" => {
                info!(shard_id, "Shard resumed");
                self.session.on_resumed();
                self.failures = 0;
                self.publish_state();
            }
            _ => {}
        }

        self.state.record_event(shard_id);
        self.metrics.record_event(shard_id, &name);

        if let Some(event) = serialize_dispatch(shard_id, frame.s, &name, frame.d) {
            self.emit(ShardEvent::Dispatch(event));
        }
    }

    async fn handle_command(
        &mut self,
        command: ShardCommand,
        socket: Option<&mut T::Socket>,
    ) -> Option<Outcome> {
        let shard_id = self.id();
        let ShardCommand { message, reply } = command;
        debug!(shard_id, event = %message.event, "Shard message received");

        let reject = |reason: &str| GatewayError::ShardRejected {
            shard_id,
            event: message.event.clone(),
            reason: reason.to_string(),
        };

        match message.event.as_str() {
            events::STATUS => {
                let _ = reply.send(Ok(self.status()));
                None
            }
            events::GATEWAY_SEND => {
                let result = match socket {
                    _ if message.payload.get("op").is_none() => {
                        Err(reject("payload must be a gateway frame with an op"))
                    }
                    Some(socket) if self.session.state() == SessionState::Ready => {
                        socket
                            .send(message.payload.to_string())
                            .await
                            .map(|()| Value::Null)
                            .map_err(|source| GatewayError::Socket { shard_id, source })
                    }
                    _ => Err(reject("shard is not ready")),
                };
                let _ = reply.send(result);
                None
            }
            events::RECONNECT => {
                let _ = reply.send(Ok(Value::Null));
                let socket = socket?;
                info!(shard_id, "Reconnect requested by manager");
                let _ = socket.close(RESUME_CLOSE_CODE).await;
                let plan = self.session.on_reconnect_request();
                Some(self.planned(plan))
            }
            events::DISCONNECT => {
                let Some(code) = message
                    .payload
                    .as_u64()
                    .and_then(|code| u16::try_from(code).ok())
                else {
                    let _ = reply.send(Err(reject("payload must be a close code")));
                    return None;
                };

                let _ = reply.send(Ok(Value::Null));
                info!(shard_id, close_code = code, "Disconnect requested by manager");
                if let Some(socket) = socket {
                    let _ = socket.close(code).await;
                }
                Some(self.on_close(Some(code)))
            }
            _ => {
                let _ = reply.send(Err(reject("unknown event")));
                None
            }
        }
    }

    fn status(&self) -> Value {
        json!({
            "shard_id": self.id(),
            "total_shards": self.shard.total(),
            "state": self.session.state(),
            "session_id": self.session.session_id(),
            "sequence": self.session.sequence(),
            "heartbeat_interval_ms": self.heart.as_ref().map(|h| h.interval().as_millis() as u64),
            "missed_acks": self.heart.as_ref().map(Heartbeater::missed),
            "latency_ms": self.state.latency(self.id()).map(|l| l.as_millis() as u64),
        })
    }

    /// Apply the session's decision for a closed connection
    fn on_close(&mut self, code: Option<u16>) -> Outcome {
        let plan = self.session.on_close(code);
        self.planned(plan)
    }

    fn planned(&mut self, plan: ReconnectPlan) -> Outcome {
        let shard_id = self.id();
        self.heart = None;
        self.ticker = None;

        match plan {
            ReconnectPlan::Terminate(code) => Outcome::Fatal(code),
            ReconnectPlan::Resume | ReconnectPlan::Reidentify => {
                let resume = plan == ReconnectPlan::Resume;
                info!(shard_id, resume, "Shard reconnecting");
                self.metrics.record_reconnect(shard_id, resume);
                self.state.record_reconnect(shard_id);
                Outcome::Reconnect
            }
        }
    }

    fn backoff(&mut self) -> Duration {
        let delay = backoff_delay(self.settings.reconnect_delay, self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    fn fatal(&mut self, code: GatewayCloseCode) -> GatewayError {
        let shard_id = self.id();
        error!(
            shard_id,
            close_code = code.code(),
            reason = code.description(),
            "Fatal gateway close code"
        );
        self.metrics.record_error(shard_id, "fatal_close");
        self.session.terminate();
        self.publish_state();
        self.terminator.terminate_all(code);
        self.emit(ShardEvent::Terminated {
            shard_id,
            close_code: Some(code),
        });

        GatewayError::FatalClose {
            shard_id,
            code: code.code(),
            reason: code.description(),
        }
    }

    fn killed(&mut self, code: GatewayCloseCode) -> GatewayError {
        let shard_id = self.id();
        warn!(shard_id, close_code = code.code(), "Shard terminated by fatal condition");
        self.session.terminate();
        self.publish_state();
        self.emit(ShardEvent::Terminated {
            shard_id,
            close_code: Some(code),
        });
        GatewayError::Terminated { shard_id }
    }

    fn publish_state(&self) {
        let shard_id = self.id();
        let state = self.session.state();
        if self.state.get_state(shard_id) == Some(state) {
            return;
        }

        self.state.set_state(shard_id, state);
        self.metrics.record_state(shard_id, state);
        self.metrics.set_shards_ready(self.state.ready_shards());
        self.emit(ShardEvent::StateChanged { shard_id, state });
    }

    /// Relay to the application without stalling the event loop
    fn emit(&self, event: ShardEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(shard_id = self.id(), kind = ?event, "Event channel full, dropping event");
                self.metrics.record_error(self.id(), "event_dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Reconnect delay after `failures` consecutive connections that never got ready
fn backoff_delay(base: Duration, failures: u32) -> Duration {
    base.saturating_mul(1 << failures.min(MAX_BACKOFF_DOUBLINGS))
        .min(MAX_BACKOFF)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_kill(kill: &mut broadcast::Receiver<GatewayCloseCode>) -> GatewayCloseCode {
    loop {
        match kill.recv().await {
            Ok(code) => return code,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => std::future::pending().await,
        }
    }
}
