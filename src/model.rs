// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared wire-adjacent types used across the relay, archive and push
//! components. These are the bridge's own normalized view of a message,
//! not a 1:1 mirror of either platform's REST/gateway payloads — each
//! gateway client is responsible for translating its platform's payload
//! into these before handing it to the relay engine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Embed {
    pub embed_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub colour: Option<String>,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

impl Author {
    /// 256px avatar URL, falling back to a platform default if none is set.
    pub fn avatar_or_default(&self, default: &str) -> String {
        self.avatar_url.clone().unwrap_or_else(|| default.to_string())
    }
}

/// A normalized inbound message, regardless of which platform produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    pub author: Author,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub reply_to_id: Option<String>,
    pub timestamp: i64,
    pub edited_timestamp: Option<i64>,
    pub is_system: bool,
    pub is_webhook_echo: bool,
}

impl InboundMessage {
    pub fn is_relayable_author(&self) -> bool {
        !self.author.is_bot && !self.is_system
    }
}
