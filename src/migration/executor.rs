// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Diff-aware, rate-limited, cancellable migration batch executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};

use super::types::{MigrationMode, MigrationOptions, MigrationProgress};
use crate::errors::{BridgeError, BridgeResult};
use crate::store::Store;
use crate::target::rest::TargetRest;

const ROLE_SPACING: Duration = Duration::from_millis(2500);
const CHANNEL_SPACING: Duration = Duration::from_millis(2500);
const EMOJI_SPACING: Duration = Duration::from_millis(2000);
const CATEGORY_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub type CancelSignal = Arc<AtomicBool>;

#[derive(Debug, Clone)]
pub struct SourceRole {
    pub id: String,
    pub name: String,
    pub colour: Option<String>,
    pub hoist: bool,
    pub mentionable: bool,
    pub has_custom_icon: bool,
    pub has_unicode_emoji_icon: bool,
    pub permissions_allow: u64,
}

#[derive(Debug, Clone)]
pub struct SourceChannel {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub description: Option<String>,
    pub nsfw: bool,
    pub category_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceEmoji {
    pub id: String,
    pub name: String,
    pub animated: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct SourceGuildSnapshot {
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub roles: Vec<SourceRole>,
    pub channels: Vec<SourceChannel>,
    pub emojis: Vec<SourceEmoji>,
}

pub struct MigrationExecutor {
    store: Arc<Store>,
    target: Arc<TargetRest>,
}

impl MigrationExecutor {
    pub fn new(store: Arc<Store>, target: Arc<TargetRest>) -> Self {
        Self { store, target }
    }

    pub async fn execute(
        &self,
        source_guild_id: &str,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        options: &MigrationOptions,
        cancel: CancelSignal,
    ) -> BridgeResult<MigrationProgress> {
        let mut progress = MigrationProgress {
            total: snapshot.roles.len() + snapshot.channels.len(),
            ..Default::default()
        };

        let server = self
            .target
            .get(&format!("/servers/{target_server_id}"))
            .await?
            .ok_or_else(|| BridgeError::NotFound { what: "target server".into() })?;

        let (existing_roles, existing_channels) = self.diff_phase(&server).await;
        let mut role_id_map: HashMap<String, String> = HashMap::new();
        let mut channel_id_map: HashMap<String, (String, Option<String>)> = HashMap::new();

        if matches!(options.mode, MigrationMode::Missing | MigrationMode::Full | MigrationMode::Roles) {
            self.run_roles_phase(target_server_id, snapshot, options, &existing_roles, &mut role_id_map, &mut progress, &cancel).await?;
        } else {
            // categories mode still needs role-link continuity if it was run before;
            // nothing to do here since roles are out of scope.
        }

        if matches!(options.mode, MigrationMode::Missing | MigrationMode::Full) {
            self.run_channels_phase(target_server_id, snapshot, options, &existing_channels, &mut channel_id_map, &mut progress, &cancel).await?;
        } else {
            for (name, id) in &existing_channels {
                channel_id_map.insert(name.clone(), (id.clone(), None));
            }
        }

        self.check_cancelled(&cancel)?;
        self.run_categories_phase(target_server_id, snapshot, &channel_id_map, options, &mut progress).await?;

        self.check_cancelled(&cancel)?;
        self.run_server_properties_phase(target_server_id, snapshot, &server, options, &mut progress).await?;

        if options.include_emoji {
            self.run_emoji_phase(target_server_id, snapshot, options, &mut progress, &cancel).await?;
        }

        if options.include_media {
            self.run_media_phase(target_server_id, snapshot, &server, options, &mut progress).await?;
        }

        let _ = source_guild_id;
        Ok(progress)
    }

    fn check_cancelled(&self, cancel: &CancelSignal) -> BridgeResult<()> {
        if cancel.load(Ordering::SeqCst) {
            Err(BridgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Builds lowercase-name lookup maps of existing target entities.
    /// Reading may fail per-item; missing entries are simply absent from the map.
    async fn diff_phase(&self, server: &Value) -> (HashMap<String, (String, Value)>, HashMap<String, String>) {
        let mut roles = HashMap::new();
        if let Some(role_map) = server.get("roles").and_then(Value::as_object) {
            for (id, role) in role_map {
                if let Some(name) = role.get("name").and_then(Value::as_str) {
                    roles.insert(name.to_lowercase(), (id.clone(), role.clone()));
                }
            }
        }

        let mut channels = HashMap::new();
        if let Some(channel_ids) = server.get("channels").and_then(Value::as_array) {
            for channel_id in channel_ids {
                let Some(id) = channel_id.as_str() else { continue };
                if let Ok(Some(channel)) = self.target.get(&format!("/channels/{id}")).await {
                    if let Some(name) = channel.get("name").and_then(Value::as_str) {
                        channels.insert(name.to_lowercase(), id.to_string());
                    }
                }
            }
        }
        (roles, channels)
    }

    async fn run_roles_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        options: &MigrationOptions,
        existing: &HashMap<String, (String, Value)>,
        role_id_map: &mut HashMap<String, String>,
        progress: &mut MigrationProgress,
        cancel: &CancelSignal,
    ) -> BridgeResult<()> {
        for role in &snapshot.roles {
            self.check_cancelled(cancel)?;
            progress.current_action = format!("role:{}", role.name);

            let mut name = role.name.clone();
            if name.chars().count() > 32 {
                progress.record_warning(format!("role name '{name}' truncated to 32 characters"));
                name = name.chars().take(32).collect();
            }
            if role.mentionable {
                progress.record_warning(format!("role '{name}' is mentionable; target has no analogue"));
            }
            if role.has_custom_icon {
                progress.record_warning(format!("role '{name}' has a custom icon; target has no analogue"));
            }
            if role.has_unicode_emoji_icon {
                progress.record_warning(format!("role '{name}' has a unicode emoji icon; target has no analogue"));
            }

            let lowered = name.to_lowercase();
            let target_role_id = if let Some((id, existing_role)) = existing.get(&lowered) {
                let needs_update = options.mode == MigrationMode::Full
                    || existing_role.get("colour").and_then(Value::as_str) != role.colour.as_deref()
                    || existing_role.get("hoist").and_then(Value::as_bool).unwrap_or(false) != role.hoist;
                if needs_update && !options.dry_run {
                    self.target
                        .patch(&format!("/servers/{target_server_id}/roles/{id}"), json!({ "colour": role.colour, "hoist": role.hoist }))
                        .await?;
                }
                if needs_update {
                    progress.updated += 1;
                } else {
                    progress.skipped += 1;
                }
                id.clone()
            } else if options.dry_run {
                progress.dry_run_log.push(format!("would create role '{name}'"));
                progress.created += 1;
                format!("dry-run:{name}")
            } else {
                let created = self
                    .target
                    .post(&format!("/servers/{target_server_id}/roles"), json!({ "name": name }))
                    .await?
                    .ok_or_else(|| BridgeError::Transport { error: "role creation returned no body".into() })?;
                let id = created.get("id").and_then(Value::as_str).ok_or_else(|| BridgeError::Transport { error: "role creation missing id".into() })?.to_string();
                self.target
                    .patch(&format!("/servers/{target_server_id}/roles/{id}"), json!({ "colour": role.colour, "hoist": role.hoist }))
                    .await?;
                progress.created += 1;
                id
            };

            if !options.dry_run {
                self.target
                    .put(&format!("/servers/{target_server_id}/permissions/{target_role_id}"), json!({ "permissions": { "allow": role.permissions_allow, "deny": 0 } }))
                    .await?;
                self.store.upsert_role_link(&role.id, &target_role_id, target_server_id).await?;
            }
            role_id_map.insert(lowered, target_role_id);
            progress.completed += 1;

            if !options.dry_run {
                tokio::time::sleep(ROLE_SPACING).await;
            }
        }
        Ok(())
    }

    async fn run_channels_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        options: &MigrationOptions,
        existing: &HashMap<String, String>,
        channel_id_map: &mut HashMap<String, (String, Option<String>)>,
        progress: &mut MigrationProgress,
        cancel: &CancelSignal,
    ) -> BridgeResult<()> {
        for channel in &snapshot.channels {
            self.check_cancelled(cancel)?;
            progress.current_action = format!("channel:{}", channel.name);
            let lowered = channel.name.to_lowercase();

            let target_channel_id = if let Some(id) = existing.get(&lowered) {
                if options.mode == MigrationMode::Full && !options.dry_run {
                    self.target
                        .patch(&format!("/channels/{id}"), json!({ "description": channel.description, "nsfw": channel.nsfw }))
                        .await?;
                    progress.updated += 1;
                } else {
                    progress.skipped += 1;
                }
                id.clone()
            } else if options.dry_run {
                progress.dry_run_log.push(format!("would create channel '{}'", channel.name));
                progress.created += 1;
                format!("dry-run:{}", channel.name)
            } else {
                let created = self
                    .target
                    .post(
                        &format!("/servers/{target_server_id}/channels"),
                        json!({ "type": channel.channel_type, "name": channel.name, "description": channel.description, "nsfw": channel.nsfw }),
                    )
                    .await?
                    .ok_or_else(|| BridgeError::Transport { error: "channel creation returned no body".into() })?;
                let id = created.get("_id").and_then(Value::as_str).ok_or_else(|| BridgeError::Transport { error: "channel creation missing _id".into() })?.to_string();
                progress.created += 1;
                id
            };

            channel_id_map.insert(lowered, (target_channel_id, channel.category_name.clone()));
            progress.completed += 1;

            if !options.dry_run {
                tokio::time::sleep(CHANNEL_SPACING).await;
            }
        }
        Ok(())
    }

    /// Rebuilds the full categories array from every mapped channel, selected
    /// or not, so the reorganization includes channels outside this run's scope.
    async fn run_categories_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        channel_id_map: &HashMap<String, (String, Option<String>)>,
        options: &MigrationOptions,
        progress: &mut MigrationProgress,
    ) -> BridgeResult<()> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for channel in &snapshot.channels {
            let Some((target_id, category_name)) = channel_id_map.get(&channel.name.to_lowercase()) else { continue };
            let Some(category_name) = category_name.clone().or_else(|| channel.category_name.clone()) else { continue };
            grouped.entry(category_name).or_default().push(target_id.clone());
        }
        if grouped.is_empty() {
            return Ok(());
        }

        let categories: Vec<Value> = grouped
            .into_iter()
            .map(|(title, channels)| json!({ "id": generate_category_id(), "title": title, "channels": channels }))
            .collect();

        if options.dry_run {
            progress.dry_run_log.push(format!("would set {} categories", categories.len()));
            return Ok(());
        }
        self.target.patch(&format!("/servers/{target_server_id}"), json!({ "categories": categories })).await?;
        progress.current_action = "categories".to_string();
        Ok(())
    }

    async fn run_server_properties_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        server: &Value,
        options: &MigrationOptions,
        progress: &mut MigrationProgress,
    ) -> BridgeResult<()> {
        let target_description = server.get("description").and_then(Value::as_str);
        if snapshot.description.as_deref() != target_description {
            if options.dry_run {
                progress.dry_run_log.push("would update server description".to_string());
            } else {
                self.target
                    .patch(&format!("/servers/{target_server_id}"), json!({ "description": snapshot.description }))
                    .await?;
                progress.updated += 1;
            }
        }
        progress.current_action = "server properties".to_string();
        Ok(())
    }

    async fn run_emoji_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        options: &MigrationOptions,
        progress: &mut MigrationProgress,
        cancel: &CancelSignal,
    ) -> BridgeResult<()> {
        let existing_names: Vec<String> = self
            .target
            .get(&format!("/servers/{target_server_id}/emojis"))
            .await?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|e| e.get("name").and_then(Value::as_str).map(str::to_lowercase))
            .collect();
        let mut taken: std::collections::HashSet<String> = existing_names.into_iter().collect();

        for emoji in &snapshot.emojis {
            self.check_cancelled(cancel)?;
            progress.current_action = format!("emoji:{}", emoji.name);

            let mut name = emoji.name.clone();
            let mut suffix = 0u32;
            while taken.contains(&name.to_lowercase()) {
                name = format!("{}{suffix}", emoji.name);
                suffix += 1;
            }
            taken.insert(name.to_lowercase());

            if options.dry_run {
                progress.dry_run_log.push(format!("would create emoji '{name}'"));
                progress.created += 1;
                continue;
            }

            let bytes = reqwest::get(&emoji.url).await?.bytes().await?.to_vec();
            let filename = if emoji.animated { format!("{name}.gif") } else { format!("{name}.png") };
            let file_id = self.target.upload_file("emojis", &filename, bytes).await?;
            self.target
                .put(&format!("/custom/emoji/{file_id}"), json!({ "name": name, "parent": { "type": "Server", "id": target_server_id } }))
                .await?;
            progress.created += 1;
            tokio::time::sleep(EMOJI_SPACING).await;
        }
        Ok(())
    }

    async fn run_media_phase(
        &self,
        target_server_id: &str,
        snapshot: &SourceGuildSnapshot,
        _server: &Value,
        options: &MigrationOptions,
        progress: &mut MigrationProgress,
    ) -> BridgeResult<()> {
        for (url, tag, field) in [
            (&snapshot.icon_url, "icons", "icon"),
            (&snapshot.banner_url, "banners", "banner"),
        ] {
            let Some(url) = url else { continue };
            progress.current_action = format!("media:{field}");
            if options.dry_run {
                progress.dry_run_log.push(format!("would update server {field}"));
                continue;
            }
            let bytes = reqwest::get(url).await?.bytes().await?.to_vec();
            let file_id = self.target.upload_file(tag, field, bytes).await?;
            self.target.patch(&format!("/servers/{target_server_id}"), json!({ field: file_id })).await?;
            progress.updated += 1;
        }
        Ok(())
    }
}

fn generate_category_id() -> String {
    let mut rng = rand::thread_rng();
    (0..12).map(|_| CATEGORY_ID_ALPHABET[rng.gen_range(0..CATEGORY_ID_ALPHABET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_ids_are_twelve_chars() {
        let id = generate_category_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
