// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! WebSocket session lifecycle for the target platform.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::events::{Authenticate, InboundEvent, OutboundEvent, Ping, Subscribe};
use crate::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Ready,
    Running,
    Closed,
}

/// Caps `processed_messages` at 10000, dropping the oldest 5000 once full.
/// Backed by a set for O(1) membership plus a queue for FIFO eviction order.
pub struct Dedup {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl Dedup {
    fn new() -> Self {
        Self { seen: HashSet::new(), order: VecDeque::new() }
    }

    /// Returns true if `id` is newly seen (caller should dispatch); false if
    /// it was already processed by WS or polling.
    pub fn observe(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > 10_000 {
            while self.order.len() > 5_000 {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
        true
    }
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state the event dispatch loop and the liveness/poll timers both
/// touch, behind one coarse mutex.
pub struct GatewayShared {
    pub state: Mutex<SessionState>,
    pub bot_user_id: Mutex<Option<String>>,
    pub subscribed_channels: Mutex<Vec<String>>,
    pub last_pong_at: Mutex<Instant>,
    pub dedup: Mutex<Dedup>,
    pub poll_cursor: Mutex<std::collections::HashMap<String, String>>,
    pub poll_offset: Mutex<usize>,
}

impl GatewayShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SessionState::Closed),
            bot_user_id: Mutex::new(None),
            subscribed_channels: Mutex::new(Vec::new()),
            last_pong_at: Mutex::new(Instant::now()),
            dedup: Mutex::new(Dedup::new()),
            poll_cursor: Mutex::new(std::collections::HashMap::new()),
            poll_offset: Mutex::new(0),
        })
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A single connect-run-disconnect cycle. The owning caller is responsible
/// for the reconnect backoff loop.
pub struct GatewaySession {
    pub shared: Arc<GatewayShared>,
    ws: WsStream,
}

impl GatewaySession {
    pub async fn connect(ws_url: &str, token: &str, shared: Arc<GatewayShared>) -> Result<Self, GatewayError> {
        *shared.state.lock().await = SessionState::Connecting;
        let url = format!("{ws_url}/?format=json");
        let (mut ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| GatewayError::CannotConnect { error: e.to_string() })?;

        *shared.state.lock().await = SessionState::Authenticating;
        let authenticate = OutboundEvent::Authenticate(Authenticate { token: token.to_string() });
        let payload = serde_json::to_string(&authenticate).expect("Authenticate always serializes");
        ws.send(WsMessage::Text(payload))
            .await
            .map_err(|e| GatewayError::CannotConnect { error: e.to_string() })?;

        *shared.last_pong_at.lock().await = Instant::now();
        Ok(Self { shared, ws })
    }

    pub async fn send_subscribe(&mut self, server_id: &str) -> Result<(), GatewayError> {
        let frame = OutboundEvent::Subscribe(Subscribe { server_id: server_id.to_string() });
        let payload = serde_json::to_string(&frame).expect("Subscribe always serializes");
        self.ws
            .send(WsMessage::Text(payload))
            .await
            .map_err(|e| GatewayError::CannotConnect { error: e.to_string() })
    }

    pub async fn send_ping(&mut self) {
        let now = chrono::Utc::now().timestamp();
        let frame = OutboundEvent::Ping(Ping { data: now });
        if let Ok(payload) = serde_json::to_string(&frame) {
            let _ = self.ws.send(WsMessage::Text(payload)).await;
        }
    }

    pub async fn close(&mut self, code: u16, reason: &str) {
        let frame = tokio_tungstenite::tungstenite::protocol::CloseFrame {
            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(code),
            reason: reason.into(),
        };
        let _ = self.ws.close(Some(frame)).await;
        *self.shared.state.lock().await = SessionState::Closed;
    }

    /// Drives the session until the connection closes or a fatal liveness
    /// timeout fires. `on_event` is invoked with every decoded inbound event;
    /// handler isolation is the caller's responsibility.
    pub async fn run<F, Fut>(&mut self, mut on_event: F) -> Result<(), GatewayError>
    where
        F: FnMut(InboundEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(30));
        let mut liveness_interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = ping_interval.tick() => {
                    self.send_ping().await;
                }
                _ = liveness_interval.tick() => {
                    let elapsed = self.shared.last_pong_at.lock().await.elapsed();
                    if elapsed > Duration::from_secs(120) {
                        warn!("no pong in {elapsed:?}, forcing reconnect");
                        self.close(4000, "pong timeout").await;
                        return Err(GatewayError::PongTimeout);
                    } else if elapsed > Duration::from_secs(90) {
                        warn!("no pong in {elapsed:?}, connection may be stale");
                    }
                }
                frame = self.ws.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_text(&text, &mut on_event).await;
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = self.ws.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("target gateway connection closed");
                            *self.shared.state.lock().await = SessionState::Closed;
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            warn!("target gateway error: {e}");
                            *self.shared.state.lock().await = SessionState::Closed;
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn handle_text<F, Fut>(&mut self, text: &str, on_event: &mut F)
    where
        F: FnMut(InboundEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let event: InboundEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("unrecognized gateway frame, ignoring: {e}");
                return;
            }
        };

        match &event {
            InboundEvent::Authenticated => {
                info!("target gateway authenticated");
            }
            InboundEvent::Pong { .. } => {
                *self.shared.last_pong_at.lock().await = Instant::now();
            }
            InboundEvent::Ready(ready) => {
                *self.shared.state.lock().await = SessionState::Ready;
                if let Some(bot) = ready.users.iter().find(|u| u.is_bot()) {
                    *self.shared.bot_user_id.lock().await = Some(bot.id.clone());
                }
                *self.shared.subscribed_channels.lock().await =
                    ready.channels.iter().map(|c| c.id.clone()).collect();
                self.shared.poll_cursor.lock().await.clear();
                *self.shared.poll_offset.lock().await = 0;
                for server in &ready.servers {
                    let _ = self.send_subscribe(&server.id).await;
                }
                *self.shared.state.lock().await = SessionState::Running;
            }
            InboundEvent::Unknown => {
                debug!("ignoring unknown gateway event tag");
            }
            _ => {}
        }

        on_event(event).await;
    }
}
