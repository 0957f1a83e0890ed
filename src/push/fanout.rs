// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gateway-event to device-list to transport dispatch.

use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde_json::{json, Value};

use super::fcm::FcmClient;
use super::webpush::WebPushDispatcher;
use crate::errors::BridgeResult;
use crate::relay::cache::TtlCache;
use crate::store::models::PushTransport;
use crate::store::Store;
use crate::target::events::GatewayMessage;
use crate::target::rest::TargetRest;

lazy_static! {
    static ref MENTION: Regex = Regex::new(r"<@([A-Z0-9]{26})>").unwrap();
}

const DEFAULT_AVATAR: &str = "https://app.stoat.chat/assets/default-avatar.png";

pub struct PushFanout {
    store: Arc<Store>,
    target: Arc<TargetRest>,
    fcm: Option<Arc<FcmClient>>,
    webpush: Arc<WebPushDispatcher>,
    channel_cache: TtlCache<Value>,
    user_cache: TtlCache<Value>,
}

impl PushFanout {
    pub fn new(store: Arc<Store>, target: Arc<TargetRest>, fcm: Option<Arc<FcmClient>>, webpush: Arc<WebPushDispatcher>) -> Self {
        Self {
            store,
            target,
            fcm,
            webpush,
            channel_cache: TtlCache::new(Duration::from_secs(600)),
            user_cache: TtlCache::new(Duration::from_secs(300)),
        }
    }

    pub async fn handle_message(&self, message: &GatewayMessage, bot_user_id: &str) -> BridgeResult<()> {
        if message.author == bot_user_id || message.masquerade.is_some() {
            return Ok(());
        }

        let mut targets: Vec<String> = MENTION
            .captures_iter(message.content.as_deref().unwrap_or(""))
            .map(|c| c[1].to_string())
            .collect();

        let channel = self.fetch_channel(&message.channel).await?;
        let channel_type = channel.get("channel_type").and_then(Value::as_str).unwrap_or("");
        if channel_type == "DirectMessage" || channel_type == "Group" {
            if let Some(recipients) = channel.get("recipients").and_then(Value::as_array) {
                targets.extend(recipients.iter().filter_map(|r| r.as_str().map(str::to_string)));
            }
            if let Some(user) = channel.get("user").and_then(Value::as_str) {
                targets.push(user.to_string());
            }
        }

        targets.retain(|id| id != &message.author);
        targets.sort();
        targets.dedup();
        if targets.is_empty() {
            return Ok(());
        }

        let author = self.fetch_user(&message.author).await?;
        let payload = json!({
            "icon": author.get("avatar").and_then(|a| a.get("_id")).and_then(Value::as_str).map(|id| format!("{}/avatars/{id}", "https://cdn.stoat.chat")).unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
            "message": {
                "_id": message.id,
                "channel": message.channel,
                "author": message.author,
                "content": message.content,
                "attachments": message.attachments,
                "user": {
                    "_id": message.author,
                    "username": author.get("username").and_then(Value::as_str).unwrap_or("unknown"),
                    "discriminator": author.get("discriminator").and_then(Value::as_str).unwrap_or("0000"),
                    "display_name": author.get("display_name").and_then(Value::as_str),
                    "avatar": author.get("avatar"),
                    "bot": author.get("bot").is_some(),
                },
            },
        });

        for user_id in targets {
            for device in self.store.devices_for_user(&user_id).await? {
                let keep = match device.transport {
                    PushTransport::Fcm => self.dispatch_fcm(&device, &payload).await,
                    PushTransport::Webpush => self.webpush.send(&device, &payload).await,
                };
                match keep {
                    Ok(true) => {}
                    Ok(false) => {
                        self.store.evict_device(&device.device_id).await?;
                    }
                    Err(e) => warn!("push dispatch failed for device {}: {e}", device.device_id),
                }
            }
        }
        Ok(())
    }

    async fn dispatch_fcm(&self, device: &crate::store::models::PushDevice, payload: &Value) -> BridgeResult<bool> {
        let Some(fcm) = &self.fcm else { return Ok(true) };
        let Some(token) = &device.fcm_token else { return Ok(false) };
        fcm.send(token, payload).await
    }

    async fn fetch_channel(&self, channel_id: &str) -> BridgeResult<Value> {
        if let Some(cached) = self.channel_cache.get(channel_id) {
            return Ok(cached);
        }
        let value = self.target.get(&format!("/channels/{channel_id}")).await?.unwrap_or(Value::Null);
        self.channel_cache.insert(channel_id, value.clone());
        Ok(value)
    }

    async fn fetch_user(&self, user_id: &str) -> BridgeResult<Value> {
        if let Some(cached) = self.user_cache.get(user_id) {
            return Ok(cached);
        }
        let value = self.target.get(&format!("/users/{user_id}")).await?.unwrap_or(Value::Null);
        self.user_cache.insert(user_id, value.clone());
        Ok(value)
    }
}
