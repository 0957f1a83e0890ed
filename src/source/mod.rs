// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Source gateway client: REST message fetch/paginate and webhook
//! send/edit/delete. The source platform's own gateway connection
//! and intents negotiation is treated the same way upstream SDKs treat a
//! bot-account gateway: outside this bridge's scope to reimplement from
//! scratch, so this module exposes the REST surface the relay engine and
//! recovery actually drive, plus a typed dispatch point gateway events are
//! fed through.

pub mod events;
pub mod gateway;

use std::time::Duration;

use reqwest::multipart;
use serde_json::Value;

use crate::errors::{BridgeError, BridgeResult};
use crate::model::{Attachment, Author, InboundMessage};

#[derive(Clone)]
pub struct SourceRest {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl SourceRest {
    pub fn new(token: String) -> Self {
        Self::with_base(token, "https://discord.com/api/v10".to_string())
    }

    /// Same as [`Self::new`] but with a configurable API base, so tests can
    /// point this client at a local mock server instead of Discord itself.
    pub fn with_base(token: String, api_base: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("building the source http client should never fail");
        Self { http, api_base, token }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bot {}", self.token))
    }

    pub async fn fetch_message(&self, channel_id: &str, message_id: &str) -> BridgeResult<Option<Value>> {
        let url = format!("{}/channels/{channel_id}/messages/{message_id}", self.api_base);
        let response = self.auth(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    /// Channel message paginator, 100 per page, walking backward from `before`
    /// when set. Returns newest-first, matching the wire order.
    pub async fn fetch_messages_before(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> BridgeResult<Vec<Value>> {
        let mut url = format!("{}/channels/{channel_id}/messages?limit={limit}", self.api_base);
        if let Some(before) = before {
            url.push_str(&format!("&before={before}"));
        }
        let response = self.auth(self.http.get(&url)).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Channel message fetch walking forward from `after` (used by outage
    /// recovery).
    pub async fn fetch_messages_after(&self, channel_id: &str, after: &str, limit: u32) -> BridgeResult<Vec<Value>> {
        let url = format!("{}/channels/{channel_id}/messages?limit={limit}&after={after}", self.api_base);
        let response = self.auth(self.http.get(&url)).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    pub async fn ensure_webhook(&self, channel_id: &str, name: &str) -> BridgeResult<(String, String)> {
        let url = format!("{}/channels/{channel_id}/webhooks", self.api_base);
        let existing: Vec<Value> = self.auth(self.http.get(&url)).send().await?.error_for_status()?.json().await?;
        if let Some(hook) = existing.iter().find(|h| h.get("name").and_then(Value::as_str) == Some(name)) {
            let id = hook.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
            let token = hook.get("token").and_then(Value::as_str).unwrap_or_default().to_string();
            return Ok((id, token));
        }
        let created: Value = self
            .auth(self.http.post(&url))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let id = created.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let token = created.get("token").and_then(Value::as_str).unwrap_or_default().to_string();
        Ok((id, token))
    }

    /// Sends via webhook impersonation. `wait=true` so the created message id
    /// comes back for pairing.
    pub async fn webhook_send(
        &self,
        webhook_id: &str,
        webhook_token: &str,
        content: &str,
        username: &str,
        avatar_url: Option<&str>,
        files: Vec<(String, Vec<u8>)>,
    ) -> BridgeResult<String> {
        let url = format!("{}/webhooks/{webhook_id}/{webhook_token}?wait=true", self.api_base);
        let payload = serde_json::json!({
            "content": content,
            "username": username,
            "avatar_url": avatar_url,
        });

        let response = if files.is_empty() {
            self.http.post(&url).json(&payload).send().await?
        } else {
            let mut form = multipart::Form::new().text("payload_json", payload.to_string());
            for (index, (filename, bytes)) in files.into_iter().enumerate() {
                let part = multipart::Part::bytes(bytes).file_name(filename);
                form = form.part(format!("files[{index}]"), part);
            }
            self.http.post(&url).multipart(form).send().await?
        };

        let value: Value = response.error_for_status()?.json().await?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Transport { error: "webhook send response missing id".to_string() })
    }

    pub async fn webhook_edit(&self, webhook_id: &str, webhook_token: &str, message_id: &str, content: &str) -> BridgeResult<()> {
        let url = format!("{}/webhooks/{webhook_id}/{webhook_token}/messages/{message_id}", self.api_base);
        self.http
            .patch(&url)
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// 404 is treated as success: the message is already gone either way.
    pub async fn webhook_delete(&self, webhook_id: &str, webhook_token: &str, message_id: &str) -> BridgeResult<()> {
        let url = format!("{}/webhooks/{webhook_id}/{webhook_token}/messages/{message_id}", self.api_base);
        let response = self.http.delete(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }
}

/// Normalizes a raw source (Discord-shaped) message payload into the bridge's
/// shared [`InboundMessage`] shape.
pub fn normalize_message(raw: &Value) -> Option<InboundMessage> {
    let id = raw.get("id")?.as_str()?.to_string();
    let channel_id = raw.get("channel_id")?.as_str()?.to_string();
    let author_raw = raw.get("author")?;
    let author = Author {
        id: author_raw.get("id")?.as_str()?.to_string(),
        display_name: author_raw
            .get("global_name")
            .and_then(Value::as_str)
            .or_else(|| author_raw.get("username").and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string(),
        avatar_url: author_raw.get("avatar").and_then(Value::as_str).map(|hash| {
            format!("https://cdn.discordapp.com/avatars/{}/{hash}.png", author_raw.get("id").and_then(Value::as_str).unwrap_or_default())
        }),
        is_bot: author_raw.get("bot").and_then(Value::as_bool).unwrap_or(false),
    };

    let attachments = raw
        .get("attachments")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| {
                    Some(Attachment {
                        url: a.get("url")?.as_str()?.to_string(),
                        filename: a.get("filename")?.as_str()?.to_string(),
                        size: a.get("size").and_then(Value::as_u64).unwrap_or(0),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let reply_to_id = raw
        .get("message_reference")
        .and_then(|r| r.get("message_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(InboundMessage {
        id,
        channel_id,
        author,
        content: raw.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
        attachments,
        embeds: Vec::new(),
        reply_to_id,
        timestamp: raw
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or(0),
        edited_timestamp: raw
            .get("edited_timestamp")
            .and_then(Value::as_str)
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp()),
        is_system: raw.get("type").and_then(Value::as_u64).map(|t| t != 0).unwrap_or(false),
        is_webhook_echo: raw.get("webhook_id").is_some(),
    })
}
