// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Minimal source-platform gateway session: identify, heartbeat, and
//! dispatch of the three message events the relay engine needs.
//! Everything else the source gateway carries (presence, voice state,
//! threads, …) is outside this bridge's scope.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::events::SourceEvent;
use crate::errors::{BridgeError, BridgeResult};

const GATEWAY_DISPATCH: u64 = 0;
const GATEWAY_HEARTBEAT: u64 = 1;
const GATEWAY_IDENTIFY: u64 = 2;
const GATEWAY_RECONNECT: u64 = 7;
const GATEWAY_INVALID_SESSION: u64 = 9;
const GATEWAY_HELLO: u64 = 10;
const GATEWAY_HEARTBEAT_ACK: u64 = 11;

/// guilds | guild-messages | message-content | guild-webhooks.
const INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15) | (1 << 25);

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub async fn run(token: String, events_tx: mpsc::Sender<SourceEvent>) -> BridgeResult<()> {
    let (mut ws, _) = tokio_tungstenite::connect_async(GATEWAY_URL)
        .await
        .map_err(|e| BridgeError::Transport { error: e.to_string() })?;

    let hello = read_json(&mut ws).await?;
    let heartbeat_interval = hello
        .get("d")
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .unwrap_or(41_250);

    send_json(
        &mut ws,
        serde_json::json!({
            "op": GATEWAY_IDENTIFY,
            "d": {
                "token": token,
                "intents": INTENTS,
                "properties": { "os": "linux", "browser": "chatbridge", "device": "chatbridge" },
            }
        }),
    )
    .await?;

    let mut ticker = tokio::time::interval(Duration::from_millis(heartbeat_interval));
    let mut last_sequence: Option<u64> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                send_json(&mut ws, serde_json::json!({ "op": GATEWAY_HEARTBEAT, "d": last_sequence })).await?;
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let value: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(e) => { debug!("bad source gateway frame: {e}"); continue; }
                        };
                        if let Some(seq) = value.get("s").and_then(Value::as_u64) {
                            last_sequence = Some(seq);
                        }
                        let op = value.get("op").and_then(Value::as_u64).unwrap_or(u64::MAX);
                        match op {
                            GATEWAY_DISPATCH => dispatch(&value, &events_tx).await,
                            GATEWAY_HEARTBEAT => {
                                send_json(&mut ws, serde_json::json!({ "op": GATEWAY_HEARTBEAT, "d": last_sequence })).await?;
                            }
                            GATEWAY_HEARTBEAT_ACK => {}
                            GATEWAY_RECONNECT | GATEWAY_INVALID_SESSION => {
                                info!("source gateway asked us to reconnect");
                                return Ok(());
                            }
                            GATEWAY_HELLO => {}
                            _ => debug!("unhandled source gateway opcode {op}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => {
                        warn!("source gateway error: {e}");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch(value: &Value, tx: &mpsc::Sender<SourceEvent>) {
    let Some(event_type) = value.get("t").and_then(Value::as_str) else { return };
    let Some(data) = value.get("d") else { return };
    let event = match event_type {
        "MESSAGE_CREATE" => SourceEvent::MessageCreate(data.clone()),
        "MESSAGE_UPDATE" => SourceEvent::MessageUpdate(data.clone()),
        "MESSAGE_DELETE" => {
            let Some(id) = data.get("id").and_then(Value::as_str) else { return };
            let Some(channel_id) = data.get("channel_id").and_then(Value::as_str) else { return };
            SourceEvent::MessageDelete { id: id.to_string(), channel_id: channel_id.to_string() }
        }
        _ => return,
    };
    if tx.send(event).await.is_err() {
        debug!("source event channel closed");
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn read_json(ws: &mut WsStream) -> BridgeResult<Value> {
    while let Some(frame) = ws.next().await {
        if let WsMessage::Text(text) = frame.map_err(|e| BridgeError::Transport { error: e.to_string() })? {
            return Ok(serde_json::from_str(&text)?);
        }
    }
    Err(BridgeError::Transport { error: "source gateway closed before sending hello".into() })
}

async fn send_json(ws: &mut WsStream, value: Value) -> BridgeResult<()> {
    ws.send(WsMessage::Text(value.to_string())).await.map_err(|e| BridgeError::Transport { error: e.to_string() })
}
