// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Paginated export and masquerade-preserving import.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use log::info;
use serde_json::Value;

use crate::errors::BridgeResult;
use crate::relay::translator;
use crate::source::SourceRest;
use crate::store::models::{ArchiveDirection, ArchiveStatus};
use crate::store::{NewArchiveMessage, Store};
use crate::target::rest::TargetRest;

const EXPORT_PAGE_SIZE: u32 = 100;
const EXPORT_PAGE_SPACING: Duration = Duration::from_millis(1500);
const IMPORT_BATCH_SIZE: i64 = 50;
const IMPORT_SPACING: Duration = Duration::from_millis(1100);
const REHOST_LIMIT: u64 = 20 * 1024 * 1024;

pub type CancelSignal = Arc<AtomicBool>;

pub struct ArchiveEngine {
    store: Arc<Store>,
    source: Arc<SourceRest>,
    target: Arc<TargetRest>,
}

impl ArchiveEngine {
    pub fn new(store: Arc<Store>, source: Arc<SourceRest>, target: Arc<TargetRest>) -> Self {
        Self { store, source, target }
    }

    /// Paginates backward through channel history, 100 messages per page,
    /// 1500ms between pages. A short final page marks
    /// end-of-history.
    pub async fn export(&self, guild_id: &str, source_channel_id: &str, source_channel_name: &str, cancel: CancelSignal) -> BridgeResult<i64> {
        if let Some(existing) = self.store.active_export_job(source_channel_id).await? {
            return Ok(existing.id);
        }
        let job_id = self
            .store
            .create_archive_job(guild_id, source_channel_id, source_channel_name, None, ArchiveDirection::Export)
            .await?;

        let mut cursor: Option<String> = None;
        let mut processed = 0i64;

        loop {
            if cancel.load(Ordering::SeqCst) {
                self.store.update_archive_progress(job_id, ArchiveStatus::Paused, processed, cursor.as_deref()).await?;
                return Ok(job_id);
            }

            let page = self.source.fetch_messages_before(source_channel_id, cursor.as_deref(), EXPORT_PAGE_SIZE).await?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            let rows: Vec<NewArchiveMessage> = page.iter().filter_map(to_archive_row).collect();
            self.store.store_archive_messages(job_id, &rows).await?;
            processed += rows.len() as i64;

            cursor = page.last().and_then(|m| m.get("id")).and_then(Value::as_str).map(str::to_string);
            self.store.update_archive_progress(job_id, ArchiveStatus::Running, processed, cursor.as_deref()).await?;
            info!("export job {job_id}: {processed} messages archived so far");

            if page_len < EXPORT_PAGE_SIZE as usize {
                break;
            }
            tokio::time::sleep(EXPORT_PAGE_SPACING).await;
        }

        self.store.finish_archive_job(job_id, ArchiveStatus::Completed, None).await?;
        Ok(job_id)
    }

    /// Imports unimported rows in ascending timestamp order, 50 at a time,
    /// spacing sends by 1100ms. Each row is posted into the target channel
    /// with a masquerade carrying the original author's name and avatar.
    pub async fn import(
        &self,
        job_id: i64,
        target_channel_id: &str,
        rehost: bool,
        preserve_embeds: bool,
        cancel: CancelSignal,
    ) -> BridgeResult<()> {
        loop {
            if cancel.load(Ordering::SeqCst) {
                self.store.update_archive_progress(job_id, ArchiveStatus::Paused, 0, None).await?;
                return Ok(());
            }

            let batch = self.store.unimported_archive_messages(job_id, IMPORT_BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }

            for row in &batch {
                if cancel.load(Ordering::SeqCst) {
                    self.store.update_archive_progress(job_id, ArchiveStatus::Paused, 0, None).await?;
                    return Ok(());
                }

                let header = Utc
                    .timestamp_opt(row.timestamp, 0)
                    .single()
                    .map(|dt| dt.format("*%Y-%m-%d %I:%M %p UTC*\n").to_string())
                    .unwrap_or_default();
                let mut content = format!("{header}{}", translator::to_target(&row.content));

                let mut replies = Vec::new();
                if let Some(reply_to) = &row.reply_to_id {
                    if let Some(target_id) = self.store.imported_target_id_for_source(job_id, reply_to).await? {
                        replies.push(target_id);
                    } else {
                        content = format!("> *Replying to a message*\n{content}");
                    }
                }

                let attachments: Vec<Value> = serde_json::from_str(&row.attachments_json).unwrap_or_default();
                let mut file_ids = Vec::new();
                for attachment in &attachments {
                    let (Some(url), Some(filename), size) = (
                        attachment.get("url").and_then(Value::as_str),
                        attachment.get("filename").and_then(Value::as_str),
                        attachment.get("size").and_then(Value::as_u64).unwrap_or(0),
                    ) else {
                        continue;
                    };
                    if rehost && size <= REHOST_LIMIT {
                        if let Ok(response) = reqwest::get(url).await {
                            if let Ok(bytes) = response.bytes().await {
                                if let Ok(file_id) = self.target.upload_file("attachments", filename, bytes.to_vec()).await {
                                    file_ids.push(file_id);
                                    continue;
                                }
                            }
                        }
                    }
                    content.push_str(&format!("\n[{filename}]({url})"));
                }

                if preserve_embeds {
                    let embeds: Vec<Value> = serde_json::from_str(&row.embeds_json).unwrap_or_default();
                    for embed in embeds {
                        let embed_type = embed.get("embed_type").and_then(Value::as_str).unwrap_or("");
                        if embed_type == "link" || embed_type == "video" || embed_type == "gifv" {
                            continue;
                        }
                        if let Some(url) = embed.get("url").and_then(Value::as_str) {
                            content.push_str(&format!("\n{url}"));
                        }
                    }
                }

                let mut body = serde_json::json!({
                    "content": content,
                    "masquerade": { "name": row.author_name, "avatar": row.author_avatar },
                    "attachments": file_ids,
                });
                if !replies.is_empty() {
                    body["replies"] = serde_json::json!(replies);
                }

                let response = self.target.post(&format!("/channels/{target_channel_id}/messages"), body).await?;
                let value = response.ok_or_else(|| crate::errors::BridgeError::Transport { error: "empty response importing message".into() })?;
                let target_id = value
                    .get("_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| crate::errors::BridgeError::Transport { error: "import response missing _id".into() })?
                    .to_string();
                self.store.mark_archive_message_imported(row.id, &target_id).await?;
                tokio::time::sleep(IMPORT_SPACING).await;
            }
        }

        self.store.finish_archive_job(job_id, ArchiveStatus::Completed, None).await?;
        Ok(())
    }
}

fn to_archive_row(raw: &Value) -> Option<NewArchiveMessage> {
    let is_system = raw.get("type").and_then(Value::as_u64).map(|t| t != 0).unwrap_or(false);
    let is_webhook = raw.get("webhook_id").is_some();
    if is_system || is_webhook {
        return None;
    }
    let author = raw.get("author")?;
    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0);
    let edited_timestamp = raw
        .get("edited_timestamp")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp());

    Some(NewArchiveMessage {
        source_message_id: raw.get("id")?.as_str()?.to_string(),
        author_id: author.get("id")?.as_str()?.to_string(),
        author_name: author.get("username").and_then(Value::as_str).unwrap_or("unknown").to_string(),
        author_avatar: author.get("avatar").and_then(Value::as_str).map(str::to_string),
        content: raw.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
        timestamp,
        edited_timestamp,
        reply_to_id: raw.get("message_reference").and_then(|r| r.get("message_id")).and_then(Value::as_str).map(str::to_string),
        attachments_json: raw.get("attachments").cloned().unwrap_or_else(|| Value::Array(vec![])).to_string(),
        embeds_json: raw.get("embeds").cloned().unwrap_or_else(|| Value::Array(vec![])).to_string(),
    })
}
