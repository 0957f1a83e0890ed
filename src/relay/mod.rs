// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bidirectional message/edit/delete relay.

pub mod cache;
pub mod translator;

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::Value;

use crate::echo_guard::{EchoGuard, EchoKind};
use crate::errors::BridgeResult;
use crate::model::InboundMessage;
use crate::source::SourceRest;
use crate::store::models::BridgeDirection;
use crate::store::Store;
use crate::target::events::GatewayMessage;
use crate::target::rest::TargetRest;
use cache::TtlCache;

const SOURCE_ATTACHMENT_LIMIT: u64 = 20 * 1024 * 1024;
const TARGET_ATTACHMENT_LIMIT: u64 = 25 * 1024 * 1024;

#[derive(Clone, Debug)]
struct ResolvedAuthor {
    name: String,
    avatar: Option<String>,
}

pub struct RelayEngine {
    store: Arc<Store>,
    source: Arc<SourceRest>,
    target: Arc<TargetRest>,
    echo: Arc<EchoGuard>,
    author_cache: TtlCache<ResolvedAuthor>,
}

impl RelayEngine {
    pub fn new(store: Arc<Store>, source: Arc<SourceRest>, target: Arc<TargetRest>, echo: Arc<EchoGuard>) -> Self {
        Self {
            store,
            source,
            target,
            echo,
            author_cache: TtlCache::new(Duration::from_secs(300)),
        }
    }

    /// Source→target relay. `suffix` appends `" [delayed]"` for
    /// outage-recovery replays; pass `""` for live relay.
    pub async fn relay_source_to_target(&self, link_id: i64, target_channel_id: &str, message: &InboundMessage, suffix: &str, rehost: bool) -> BridgeResult<Option<String>> {
        if !message.is_relayable_author() {
            return Ok(None);
        }

        let mut content = translator::to_target(&message.content);
        let mut file_ids = Vec::new();

        if rehost {
            for attachment in &message.attachments {
                match self.rehost_to_target(attachment).await {
                    Ok(file_id) => file_ids.push(file_id),
                    Err(e) => {
                        warn!("attachment re-host failed, falling back to url: {e}");
                        content.push('\n');
                        content.push_str(&attachment.url);
                    }
                }
            }
        } else {
            for attachment in &message.attachments {
                content.push('\n');
                content.push_str(&attachment.url);
            }
        }

        if content.trim().is_empty() && file_ids.is_empty() {
            return Ok(None);
        }

        let mut replies = Vec::new();
        if let Some(reply_to) = &message.reply_to_id {
            if let Some(pair) = self.store.pair_by_source(reply_to).await? {
                replies.push(pair.target_message_id);
            } else {
                content = format!("> *Replying to a message*\n{content}");
            }
        }

        let display_name = format!("{}{suffix}", message.author.display_name);
        let avatar = message.author.avatar_url.clone();

        let target_id = self.send_target_message(target_channel_id, &content, &display_name, avatar.as_deref(), &file_ids, &replies).await?;

        self.echo.mark(EchoKind::Bridged, target_id.clone());
        self.store
            .store_bridge_message(&message.id, &target_id, &message.channel_id, target_channel_id, BridgeDirection::SourceToTarget)
            .await?;
        self.store.update_bridge_cursor(link_id, Some(&message.id), Some(&target_id)).await?;
        Ok(Some(target_id))
    }

    async fn send_target_message(&self, channel_id: &str, content: &str, name: &str, avatar: Option<&str>, file_ids: &[String], replies: &[String]) -> BridgeResult<String> {
        let mut body = serde_json::json!({
            "content": content,
            "masquerade": { "name": name, "avatar": avatar },
            "attachments": file_ids,
        });
        if !replies.is_empty() {
            body["replies"] = serde_json::json!(replies);
        }
        let response = self.target.post(&format!("/channels/{channel_id}/messages"), body).await?;
        let value = response.ok_or_else(|| crate::errors::BridgeError::Transport { error: "empty response sending target message".into() })?;
        value
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| crate::errors::BridgeError::Transport { error: "target message response missing _id".into() })
    }

    async fn rehost_to_target(&self, attachment: &crate::model::Attachment) -> BridgeResult<String> {
        if attachment.size > SOURCE_ATTACHMENT_LIMIT {
            return Err(crate::errors::BridgeError::Validation { error: "attachment exceeds re-host limit".into() });
        }
        let bytes = self.source_fetch_bytes(&attachment.url).await?;
        self.target.upload_file("attachments", &attachment.filename, bytes).await
    }

    async fn source_fetch_bytes(&self, url: &str) -> BridgeResult<Vec<u8>> {
        let response = reqwest::get(url).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Target→source relay.
    pub async fn relay_target_to_source(&self, message: &GatewayMessage, suffix: &str, rehost: bool) -> BridgeResult<Option<String>> {
        if self.echo.was(EchoKind::Bridged, &message.id) {
            return Ok(None);
        }
        if message.masquerade.is_some() {
            return Ok(None);
        }
        let Some(link) = self.store.channel_link_by_target(&message.channel.clone()).await? else {
            return Ok(None);
        };
        if !link.can_relay_to_source() {
            return Ok(None);
        }
        let webhook_id = link.webhook_id.clone().unwrap();
        let webhook_token = link.webhook_token.clone().unwrap();

        let raw_content = message.content.clone().unwrap_or_default();
        let mut content = translator::to_source(&raw_content);

        if let Some(reply_id) = message.replies.first() {
            if let Some(pair) = self.store.pair_by_target(reply_id).await? {
                content = format!("> replying to {}\n{content}", pair.source_message_id);
            } else {
                content = format!("> *Replying to a message*\n{content}");
            }
        }

        let mut files = Vec::new();
        if rehost {
            for attachment in message.attachments.clone().unwrap_or_default() {
                let (Some(url), Some(filename), size) = (
                    attachment.get("url").and_then(Value::as_str).map(str::to_string),
                    attachment.get("filename").and_then(Value::as_str).map(str::to_string),
                    attachment.get("size").and_then(Value::as_u64).unwrap_or(0),
                ) else {
                    continue;
                };
                if size > TARGET_ATTACHMENT_LIMIT {
                    content.push('\n');
                    content.push_str(&format!("[{filename}]({url})"));
                    continue;
                }
                match reqwest::get(&url).await {
                    Ok(response) => match response.bytes().await {
                        Ok(bytes) => files.push((filename, bytes.to_vec())),
                        Err(_) => content.push_str(&format!("\n[{filename}]({url})")),
                    },
                    Err(_) => content.push_str(&format!("\n[{filename}]({url})")),
                }
            }
        }

        let author = self.resolve_target_author(&message.author).await?;
        let target_id = self.source.webhook_send(&webhook_id, &webhook_token, &content, &format!("{}{suffix}", author.name), author.avatar.as_deref(), files).await?;

        self.echo.mark(EchoKind::Bridged, message.id.clone());
        self.store
            .store_bridge_message(&target_id, &message.id, &link.source_channel_id, &message.channel, BridgeDirection::TargetToSource)
            .await?;
        self.store.update_bridge_cursor(link.id, Some(&target_id), Some(&message.id)).await?;
        Ok(Some(target_id))
    }

    async fn resolve_target_author(&self, user_id: &str) -> BridgeResult<ResolvedAuthor> {
        if let Some(cached) = self.author_cache.get(user_id) {
            return Ok(cached);
        }
        let user = self.target.get(&format!("/users/{user_id}")).await?.unwrap_or(Value::Null);
        let name = user.get("display_name").and_then(Value::as_str)
            .or_else(|| user.get("username").and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string();
        let avatar = user
            .get("avatar")
            .and_then(|a| a.get("_id"))
            .and_then(Value::as_str)
            .map(|id| format!("https://cdn.stoat.chat/avatars/{id}"));
        let resolved = ResolvedAuthor { name, avatar };
        self.author_cache.insert(user_id, resolved.clone());
        Ok(resolved)
    }

    /// Edit sync, source-originated direction.
    pub async fn sync_edit_from_source(&self, source_message_id: &str, new_content: &str) -> BridgeResult<()> {
        let Some(pair) = self.store.pair_by_source(source_message_id).await? else {
            return Ok(());
        };
        self.echo.mark(EchoKind::Edited, pair.target_message_id.clone());
        let content = translator::to_target(new_content);
        self.target
            .patch(&format!("/channels/{}/messages/{}", pair.target_channel_id, pair.target_message_id), serde_json::json!({ "content": content }))
            .await?;
        Ok(())
    }

    /// Edit sync, target-originated direction.
    pub async fn sync_edit_from_target(&self, target_message_id: &str, new_content: &str) -> BridgeResult<()> {
        if self.echo.was(EchoKind::Edited, target_message_id) {
            return Ok(());
        }
        let Some(pair) = self.store.pair_by_target(target_message_id).await? else {
            return Ok(());
        };
        let Some(link) = self.store.channel_link_by_source(&pair.source_channel_id).await? else {
            return Ok(());
        };
        if !link.can_relay_to_source() {
            return Ok(());
        }
        self.echo.mark(EchoKind::Edited, pair.source_message_id.clone());
        let content = translator::to_source(new_content);
        self.source
            .webhook_edit(&link.webhook_id.unwrap(), &link.webhook_token.unwrap(), &pair.source_message_id, &content)
            .await
    }

    /// Delete sync, source-originated direction.
    pub async fn sync_delete_from_source(&self, source_message_id: &str) -> BridgeResult<()> {
        let Some(pair) = self.store.pair_by_source(source_message_id).await? else {
            return Ok(());
        };
        self.echo.mark(EchoKind::Deleted, pair.target_message_id.clone());
        self.target.delete(&format!("/channels/{}/messages/{}", pair.target_channel_id, pair.target_message_id)).await?;
        self.store.delete_pair_by_source(source_message_id).await
    }

    /// Delete sync, target-originated direction.
    pub async fn sync_delete_from_target(&self, target_message_id: &str) -> BridgeResult<()> {
        if self.echo.was(EchoKind::Deleted, target_message_id) {
            return Ok(());
        }
        let Some(pair) = self.store.pair_by_target(target_message_id).await? else {
            return Ok(());
        };
        let Some(link) = self.store.channel_link_by_source(&pair.source_channel_id).await? else {
            return Ok(());
        };
        if link.can_relay_to_source() {
            self.echo.mark(EchoKind::Deleted, pair.source_message_id.clone());
            self.source
                .webhook_delete(&link.webhook_id.unwrap(), &link.webhook_token.unwrap(), &pair.source_message_id)
                .await?;
        }
        self.store.delete_pair_by_target(target_message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_bot_authored_messages() {
        let message = InboundMessage {
            id: "1".into(),
            channel_id: "c".into(),
            author: crate::model::Author { id: "a".into(), display_name: "Bot".into(), avatar_url: None, is_bot: true },
            content: "hi".into(),
            attachments: vec![],
            embeds: vec![],
            reply_to_id: None,
            timestamp: 0,
            edited_timestamp: None,
            is_system: false,
            is_webhook_echo: false,
        };
        assert!(!message.is_relayable_author());
    }
}
