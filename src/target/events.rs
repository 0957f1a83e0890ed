// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed payloads for the target platform's tag-discriminated WS protocol.

use chatbridge_macros::WebSocketEvent;
use serde::{Deserialize, Serialize};

/// Marker trait for every type that can travel over the target WebSocket,
/// implemented via `#[derive(WebSocketEvent)]`.
pub trait WebSocketEvent: Send + Sync {}

#[derive(Debug, Clone, Serialize, WebSocketEvent)]
pub struct Authenticate {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, WebSocketEvent)]
pub struct Ping {
    pub data: i64,
}

#[derive(Debug, Clone, Serialize, WebSocketEvent)]
pub struct Subscribe {
    pub server_id: String,
}

/// Outbound frames are internally tagged by `type`, matching the target
/// platform's wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    Authenticate(Authenticate),
    Ping(Ping),
    Subscribe(Subscribe),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: Option<serde_json::Value>,
}

impl GatewayUser {
    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayServer {
    #[serde(rename = "_id")]
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayChannel {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub channel_type: Option<String>,
}

/// The subset of `Ready` this bridge needs: enough to subscribe to every
/// server, discover the bot's own id, and prime the polling fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    #[serde(default)]
    pub users: Vec<GatewayUser>,
    #[serde(default)]
    pub servers: Vec<GatewayServer>,
    #[serde(default)]
    pub channels: Vec<GatewayChannel>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayMasquerade {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
    pub author: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub replies: Vec<String>,
    #[serde(default)]
    pub masquerade: Option<GatewayMasquerade>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMessageUpdate {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayMessageDelete {
    #[serde(rename = "_id")]
    pub id: String,
    pub channel: String,
}

/// The tag-discriminated union of inbound gateway events this bridge
/// understands. Anything else is logged and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    Authenticated,
    Ready(ReadyPayload),
    Pong { data: i64 },
    Message(GatewayMessage),
    MessageUpdate(GatewayMessageUpdate),
    MessageDelete(GatewayMessageDelete),
    MessageReact { id: String, channel_id: String, user_id: String, emoji_id: String },
    MessageUnreact { id: String, channel_id: String, user_id: String, emoji_id: String },
    ChannelStartTyping { id: String, user: String },
    ChannelUpdate { id: String, data: serde_json::Value },
    #[serde(other)]
    Unknown,
}
