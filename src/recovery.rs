// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Outage recovery: on reconnect, replay the gap each direction missed
//! while disconnected.

use std::time::Duration;

use log::{info, warn};
use serde_json::Value;

use crate::errors::BridgeResult;
use crate::relay::RelayEngine;
use crate::source::{normalize_message, SourceRest};
use crate::store::Store;
use crate::target::events::GatewayMessage;
use crate::target::rest::TargetRest;

const DELAYED_SUFFIX: &str = " [delayed]";
const SOURCE_TO_TARGET_SPACING: Duration = Duration::from_millis(1100);
const TARGET_TO_SOURCE_SPACING: Duration = Duration::from_millis(500);

/// Runs once per C3 `Ready` transition, across every active channel link.
pub async fn recover_all(store: &Store, relay: &RelayEngine, source: &SourceRest, target: &TargetRest) -> BridgeResult<()> {
    for link in store.all_active_channel_links().await? {
        if let Some(last_source_id) = &link.last_bridged_source_id {
            if let Err(e) = recover_source_to_target(store, relay, source, link.id, &link.source_channel_id, &link.target_channel_id, last_source_id).await {
                warn!("source->target recovery failed for channel {}: {e}", link.source_channel_id);
            }
        }
        if let Some(last_target_id) = &link.last_bridged_target_id {
            if let Err(e) = recover_target_to_source(store, relay, target, link.id, &link.target_channel_id, last_target_id).await {
                warn!("target->source recovery failed for channel {}: {e}", link.target_channel_id);
            }
        }
    }
    Ok(())
}

async fn recover_source_to_target(
    _store: &Store,
    relay: &RelayEngine,
    source: &SourceRest,
    link_id: i64,
    source_channel_id: &str,
    target_channel_id: &str,
    last_bridged_source_id: &str,
) -> BridgeResult<()> {
    let raw_messages = source.fetch_messages_after(source_channel_id, last_bridged_source_id, 100).await?;
    let mut messages: Vec<_> = raw_messages.iter().filter_map(normalize_message).filter(|m| m.is_relayable_author()).collect();
    messages.sort_by_key(|m| m.timestamp);

    if messages.is_empty() {
        return Ok(());
    }
    info!("replaying {} source->target messages for channel {source_channel_id}", messages.len());

    for message in &messages {
        relay.relay_source_to_target(link_id, target_channel_id, message, DELAYED_SUFFIX, false).await?;
        tokio::time::sleep(SOURCE_TO_TARGET_SPACING).await;
    }
    Ok(())
}

async fn recover_target_to_source(
    store: &Store,
    relay: &RelayEngine,
    target: &TargetRest,
    _link_id: i64,
    target_channel_id: &str,
    last_bridged_target_id: &str,
) -> BridgeResult<()> {
    let path = format!("/channels/{target_channel_id}/messages?limit=100&after={last_bridged_target_id}&sort=Oldest");
    let raw = target.get(&path).await?.unwrap_or(Value::Array(Vec::new()));
    let mut messages: Vec<GatewayMessage> = serde_json::from_value(raw)?;
    messages.retain(|m| m.masquerade.is_none());

    if messages.is_empty() {
        return Ok(());
    }
    info!("replaying {} target->source messages for channel {target_channel_id}", messages.len());

    for message in &messages {
        relay.relay_target_to_source(message, DELAYED_SUFFIX, false).await?;
        tokio::time::sleep(TARGET_TO_SOURCE_SPACING).await;
    }
    let _ = store;
    Ok(())
}
