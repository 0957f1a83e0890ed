// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! REST polling fallback for channel messages the WS may have missed while
//! otherwise healthy.

use std::sync::Arc;

use log::warn;
use serde_json::Value;

use super::events::GatewayMessage;
use super::gateway::GatewayShared;
use super::rest::TargetRest;

const BATCH_SIZE: usize = 10;

/// One rotating pass over `batch` channels, advancing the stored offset.
/// Returns messages discovered since each channel's last-seen cursor, oldest
/// first, with the bot's own messages filtered out.
pub async fn poll_once(
    rest: &TargetRest,
    shared: &Arc<GatewayShared>,
) -> Vec<GatewayMessage> {
    let channels = shared.subscribed_channels.lock().await.clone();
    if channels.is_empty() {
        return Vec::new();
    }

    let mut offset = shared.poll_offset.lock().await;
    let start = *offset % channels.len();
    *offset = (*offset + BATCH_SIZE) % channels.len().max(1);
    drop(offset);

    let batch: Vec<&String> = channels.iter().cycle().skip(start).take(BATCH_SIZE.min(channels.len())).collect();
    let bot_id = shared.bot_user_id.lock().await.clone();

    let mut discovered = Vec::new();
    for channel_id in batch {
        let cursor = shared.poll_cursor.lock().await.get(channel_id).cloned();
        let path = match &cursor {
            Some(after) => format!("/channels/{channel_id}/messages?limit=10&after={after}&sort=Latest"),
            None => format!("/channels/{channel_id}/messages?limit=1&sort=Latest"),
        };

        let response = match rest.get(&path).await {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(e) => {
                warn!("poll fetch failed for {channel_id}: {e}");
                continue;
            }
        };

        let mut messages: Vec<GatewayMessage> = match parse_messages(response) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("poll response decode failed for {channel_id}: {e}");
                continue;
            }
        };
        messages.reverse();

        if let Some(last) = messages.last() {
            shared.poll_cursor.lock().await.insert(channel_id.clone(), last.id.clone());
        }

        if cursor.is_some() {
            for message in messages {
                if Some(&message.author) != bot_id.as_ref() {
                    discovered.push(message);
                }
            }
        }
    }
    discovered
}

fn parse_messages(value: Value) -> serde_json::Result<Vec<GatewayMessage>> {
    serde_json::from_value(value)
}
