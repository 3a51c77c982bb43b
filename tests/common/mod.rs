//! In-memory transports shared by the integration tests

#![allow(dead_code)]

use arrakis_client::gateway::{GatewaySocket, GatewayTransport, SocketMessage};
use arrakis_client::rest::{ApiRequest, HttpResponse, HttpTransport};
use arrakis_client::BoxError;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use twilight_model::gateway::ShardId;

// --- HTTP ---------------------------------------------------------------

/// Canned response of the mock HTTP transport
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            ..Self::ok(body)
        }
    }

    /// Attach limiter headers
    pub fn limits(mut self, remaining: u32, limit: u32, reset_after: f64) -> Self {
        self.headers.push(("x-ratelimit-remaining", remaining.to_string()));
        self.headers.push(("x-ratelimit-limit", limit.to_string()));
        self.headers.push(("x-ratelimit-reset-after", reset_after.to_string()));
        self
    }

    /// A reply the transport cannot build, surfacing as a transport failure
    pub fn broken() -> Self {
        let mut reply = Self::ok(Value::Null);
        reply.headers.push(("x-broken", "line\nbreak".to_string()));
        reply
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Responder = dyn Fn(&ApiRequest, usize) -> Reply + Send + Sync;

/// HTTP transport answering from a closure and recording every request path
#[derive(Clone)]
pub struct MockHttp {
    log: Arc<Mutex<Vec<String>>>,
    responder: Arc<Responder>,
}

impl MockHttp {
    /// `responder` gets the request and its zero-based arrival index
    pub fn new(responder: impl Fn(&ApiRequest, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Paths of every request received so far, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl HttpTransport for MockHttp {
    async fn execute(&self, request: ApiRequest) -> Result<HttpResponse, BoxError> {
        let index = {
            let mut log = self.log.lock().unwrap();
            log.push(request.route.path());
            log.len() - 1
        };
        let reply = (self.responder)(&request, index);

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &reply.headers {
            headers.insert(*name, HeaderValue::from_str(value)?);
        }

        Ok(HttpResponse {
            status: reply.status,
            url: format!("https://discord.test/api/v10{}", request.route.path()),
            headers,
            body: if reply.body.is_null() {
                Vec::new()
            } else {
                serde_json::to_vec(&reply.body)?
            },
        })
    }
}

// --- Gateway ------------------------------------------------------------

/// Heartbeat interval announced in Hello
pub const HEARTBEAT_INTERVAL_MS: u64 = 45_000;

#[derive(Default)]
struct GatewayLog {
    connects: Vec<(u32, String, Instant)>,
    sent: Vec<(u32, Value)>,
    closes: Vec<(u32, u16)>,
    servers: HashMap<u32, mpsc::UnboundedSender<SocketMessage>>,
    silent: HashSet<u32>,
    unacked: HashSet<u32>,
    stalled: HashSet<u32>,
    sessions: u32,
}

/// Scripted gateway
///
/// Every connection gets a Hello (unless the shard is silenced), an identify
/// is answered with READY, a resume with RESUMED and heartbeats with acks.
#[derive(Clone, Default)]
pub struct MockGateway {
    log: Arc<Mutex<GatewayLog>>,
}

impl MockGateway {
    /// Never say Hello to this shard
    pub fn silence(&self, shard_id: u32) {
        self.log.lock().unwrap().silent.insert(shard_id);
    }

    /// Stop acknowledging this shard's heartbeats
    pub fn stop_acking(&self, shard_id: u32) {
        self.log.lock().unwrap().unacked.insert(shard_id);
    }

    /// Make every later write of this shard hang
    pub fn stall_sends(&self, shard_id: u32) {
        self.log.lock().unwrap().stalled.insert(shard_id);
    }

    /// Push a frame to the shard's current connection
    pub fn push(&self, shard_id: u32, message: SocketMessage) {
        if let Some(server) = self.log.lock().unwrap().servers.get(&shard_id) {
            let _ = server.send(message);
        }
    }

    /// Close the shard's current connection from the server side
    pub fn close(&self, shard_id: u32, code: u16) {
        self.push(shard_id, SocketMessage::Close(Some(code)));
    }

    pub fn connects(&self) -> Vec<(u32, String, Instant)> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn connect_count(&self, shard_id: u32) -> usize {
        self.log
            .lock()
            .unwrap()
            .connects
            .iter()
            .filter(|(id, _, _)| *id == shard_id)
            .count()
    }

    /// Frames a shard sent with the given opcode
    pub fn sent_with_op(&self, shard_id: u32, op: u8) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(id, frame)| *id == shard_id && frame["op"] == op)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn closes(&self, shard_id: u32) -> Vec<u16> {
        self.log
            .lock()
            .unwrap()
            .closes
            .iter()
            .filter(|(id, _)| *id == shard_id)
            .map(|(_, code)| *code)
            .collect()
    }
}

impl GatewayTransport for MockGateway {
    type Socket = MockSocket;

    async fn connect(&self, shard: ShardId, url: &str) -> Result<MockSocket, BoxError> {
        let shard_id = shard.number();
        let (server, incoming) = mpsc::unbounded_channel();

        let mut log = self.log.lock().unwrap();
        log.connects.push((shard_id, url.to_string(), Instant::now()));
        if !log.silent.contains(&shard_id) {
            let hello = json!({ "op": 10, "d": { "heartbeat_interval": HEARTBEAT_INTERVAL_MS } });
            let _ = server.send(SocketMessage::Text(hello.to_string()));
        }
        log.servers.insert(shard_id, server.clone());

        Ok(MockSocket {
            shard_id,
            incoming,
            server,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct MockSocket {
    shard_id: u32,
    incoming: mpsc::UnboundedReceiver<SocketMessage>,
    server: mpsc::UnboundedSender<SocketMessage>,
    log: Arc<Mutex<GatewayLog>>,
}

impl MockSocket {
    fn answer(&self, frame: &Value) -> Option<Value> {
        match frame["op"].as_u64()? {
            1 if self.log.lock().unwrap().unacked.contains(&self.shard_id) => None,
            1 => Some(json!({ "op": 11 })),
            2 => {
                let mut log = self.log.lock().unwrap();
                log.sessions += 1;
                Some(json!({
                    "op": 0,
                    "s": 1,
                    "t": "READY",
                    "d": {
                        "session_id": format!("session-{}-{}", self.shard_id, log.sessions),
                        "resume_gateway_url": format!("wss://resume.test/{}", self.shard_id),
                        "guilds": [],
                    },
                }))
            }
            6 => {
                let seq = frame["d"]["seq"].as_u64().unwrap_or(0);
                Some(json!({ "op": 0, "s": seq + 1, "t": "RESUMED", "d": {} }))
            }
            _ => None,
        }
    }
}

impl GatewaySocket for MockSocket {
    async fn send(&mut self, text: String) -> Result<(), BoxError> {
        let stalled = self.log.lock().unwrap().stalled.contains(&self.shard_id);
        if stalled {
            std::future::pending::<()>().await;
        }

        let frame: Value = serde_json::from_str(&text)?;
        let answer = self.answer(&frame);
        self.log.lock().unwrap().sent.push((self.shard_id, frame));

        if let Some(answer) = answer {
            let _ = self.server.send(SocketMessage::Text(answer.to_string()));
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<SocketMessage, BoxError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16) -> Result<(), BoxError> {
        self.log.lock().unwrap().closes.push((self.shard_id, code));
        Ok(())
    }
}

/// Poll `condition` until it holds, advancing (paused) time in small steps
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
