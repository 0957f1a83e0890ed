// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Row types for every table this bridge persists.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ServerLink {
    pub source_guild_id: String,
    pub target_server_id: String,
    pub linked_by_source_user: Option<String>,
    pub linked_by_target_user: Option<String>,
    pub auth_method: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ChannelLink {
    pub id: i64,
    pub source_channel_id: String,
    pub target_channel_id: String,
    pub webhook_id: Option<String>,
    pub webhook_token: Option<String>,
    pub active: bool,
    pub last_bridged_source_id: Option<String>,
    pub last_bridged_target_id: Option<String>,
    pub last_bridged_at: Option<i64>,
    pub created_at: i64,
}

impl ChannelLink {
    pub fn can_relay_to_source(&self) -> bool {
        self.webhook_id.is_some() && self.webhook_token.is_some() && self.active
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct RoleLink {
    pub source_role_id: String,
    pub target_role_id: String,
    pub source_guild_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum BridgeDirection {
    #[sqlx(rename = "s2t")]
    SourceToTarget,
    #[sqlx(rename = "t2s")]
    TargetToSource,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub id: i64,
    pub source_message_id: String,
    pub target_message_id: String,
    pub source_channel_id: String,
    pub target_channel_id: String,
    pub direction: BridgeDirection,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ClaimCode {
    pub code: String,
    pub target_server_id: String,
    pub created_by: String,
    pub created_in: String,
    pub created_at: i64,
    pub used_by_guild: Option<String>,
    pub used_by_user: Option<String>,
    pub used_at: Option<i64>,
}

impl ClaimCode {
    pub fn is_expired(&self, now: i64) -> bool {
        self.used_by_guild.is_none() && now - self.created_at > 3600
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub id: i64,
    pub source_guild_id: String,
    pub source_guild_name: String,
    pub source_user_id: String,
    pub source_user_name: String,
    pub target_server_id: String,
    pub target_channel_id: String,
    pub target_message_id: Option<String>,
    pub status: MigrationStatus,
    pub approved_by: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum ArchiveDirection {
    Export,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ArchiveJob {
    pub id: i64,
    pub guild_id: String,
    pub source_channel_id: String,
    pub source_channel_name: String,
    pub target_channel_id: Option<String>,
    pub direction: ArchiveDirection,
    pub status: ArchiveStatus,
    pub total_messages: i64,
    pub processed_messages: i64,
    pub last_message_id: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ArchiveMessage {
    pub id: i64,
    pub job_id: i64,
    pub source_message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub content: String,
    pub timestamp: i64,
    pub edited_timestamp: Option<i64>,
    pub reply_to_id: Option<String>,
    pub attachments_json: String,
    pub embeds_json: String,
    pub target_message_id: Option<String>,
    pub imported_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
pub enum PushTransport {
    Fcm,
    Webpush,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct PushDevice {
    pub id: i64,
    pub target_user_id: String,
    pub device_id: String,
    pub transport: PushTransport,
    pub fcm_token: Option<String>,
    pub webpush_endpoint: Option<String>,
    pub webpush_p256dh: Option<String>,
    pub webpush_auth: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PushDevice {
    /// A WebPush device missing the encryption keys is a plain-POST endpoint
    /// (e.g. ntfy / UnifiedPush) rather than an RFC 8291 encrypted one.
    pub fn is_plain_webpush(&self) -> bool {
        self.transport == PushTransport::Webpush
            && (self.webpush_p256dh.is_none() || self.webpush_auth.is_none())
    }
}
