// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The persistent store: schema, migrations, and typed CRUD for every table
//! this bridge needs. Single-file embedded SQLite with WAL journaling and
//! foreign keys on.
//!
//! All other components treat this as the single source of truth; they hold
//! only in-memory caches. Every query here is either a single statement
//! (implicitly serialized by SQLite) or, where atomicity matters
//! (claim-code consumption, bulk archive insert), an explicit transaction.

pub mod models;

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::errors::{BridgeError, BridgeResult};
use models::*;

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

const MIGRATIONS: &[&[&str]] = &[
    // version 1: base schema
    &[
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        "CREATE TABLE IF NOT EXISTS server_links (
            source_guild_id TEXT PRIMARY KEY,
            target_server_id TEXT NOT NULL UNIQUE,
            linked_by_source_user TEXT,
            linked_by_target_user TEXT,
            auth_method TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS channel_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_channel_id TEXT NOT NULL UNIQUE,
            target_channel_id TEXT NOT NULL UNIQUE,
            webhook_id TEXT,
            webhook_token TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            last_bridged_source_id TEXT,
            last_bridged_target_id TEXT,
            last_bridged_at INTEGER,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS role_links (
            source_role_id TEXT PRIMARY KEY,
            target_role_id TEXT NOT NULL,
            source_guild_id TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS bridge_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_message_id TEXT NOT NULL UNIQUE,
            target_message_id TEXT NOT NULL UNIQUE,
            source_channel_id TEXT NOT NULL,
            target_channel_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS claim_codes (
            code TEXT PRIMARY KEY,
            target_server_id TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_in TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            used_by_guild TEXT,
            used_by_user TEXT,
            used_at INTEGER
        )",
        "CREATE TABLE IF NOT EXISTS migration_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_guild_id TEXT NOT NULL,
            source_guild_name TEXT NOT NULL,
            source_user_id TEXT NOT NULL,
            source_user_name TEXT NOT NULL,
            target_server_id TEXT NOT NULL,
            target_channel_id TEXT NOT NULL,
            target_message_id TEXT,
            status TEXT NOT NULL,
            approved_by TEXT,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER,
            expires_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS archive_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guild_id TEXT NOT NULL,
            source_channel_id TEXT NOT NULL,
            source_channel_name TEXT NOT NULL,
            target_channel_id TEXT,
            direction TEXT NOT NULL,
            status TEXT NOT NULL,
            total_messages INTEGER NOT NULL DEFAULT 0,
            processed_messages INTEGER NOT NULL DEFAULT 0,
            last_message_id TEXT,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            error TEXT
        )",
        "CREATE TABLE IF NOT EXISTS archive_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL REFERENCES archive_jobs(id),
            source_message_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_avatar TEXT,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            edited_timestamp INTEGER,
            reply_to_id TEXT,
            attachments_json TEXT NOT NULL DEFAULT '[]',
            embeds_json TEXT NOT NULL DEFAULT '[]',
            target_message_id TEXT,
            imported_at INTEGER,
            UNIQUE(job_id, source_message_id)
        )",
        "CREATE TABLE IF NOT EXISTS push_devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_user_id TEXT NOT NULL,
            device_id TEXT NOT NULL UNIQUE,
            transport TEXT NOT NULL,
            fcm_token TEXT,
            webpush_endpoint TEXT,
            webpush_p256dh TEXT,
            webpush_auth TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_push_devices_user ON push_devices(target_user_id)",
    ],
];

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the embedded database at `path`, enables WAL
    /// and foreign keys, and runs any migrations newer than the stored
    /// `schema_version`.
    pub async fn open(path: &str) -> BridgeResult<Store> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| BridgeError::Storage { error: e.to_string() })?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> BridgeResult<Store> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn current_version(&self) -> BridgeResult<i64> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .unwrap_or(None);
        Ok(exists.unwrap_or(0))
    }

    /// Runs every migration whose version is greater than the current one.
    /// A statement that fails with "duplicate column" / "already exists" is
    /// treated as success, so migrations are safe to re-run against a
    /// partially-applied database.
    async fn migrate(&self) -> BridgeResult<()> {
        let current = self.current_version().await?;
        for (idx, statements) in MIGRATIONS.iter().enumerate() {
            let version = (idx + 1) as i64;
            if version <= current {
                continue;
            }
            info!("running migration {version}");
            for statement in *statements {
                if let Err(error) = sqlx::query(statement).execute(&self.pool).await {
                    let message = error.to_string().to_lowercase();
                    if message.contains("duplicate column") || message.contains("already exists") {
                        debug!("migration {version} statement already applied: {error}");
                        continue;
                    }
                    return Err(error.into());
                }
            }
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // ---- server links ----------------------------------------------------

    pub async fn create_server_link(
        &self,
        source_guild_id: &str,
        target_server_id: &str,
        linked_by_source_user: Option<&str>,
        linked_by_target_user: Option<&str>,
        auth_method: &str,
    ) -> BridgeResult<()> {
        if self.server_link_by_target(target_server_id).await?.is_some() {
            return Err(BridgeError::Conflict {
                error: format!("target server {target_server_id} is already linked"),
            });
        }
        sqlx::query(
            "INSERT INTO server_links (source_guild_id, target_server_id, linked_by_source_user, linked_by_target_user, auth_method, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(source_guild_id)
        .bind(target_server_id)
        .bind(linked_by_source_user)
        .bind(linked_by_target_user)
        .bind(auth_method)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn server_link_by_source(&self, source_guild_id: &str) -> BridgeResult<Option<ServerLink>> {
        Ok(sqlx::query_as::<_, ServerLink>("SELECT * FROM server_links WHERE source_guild_id = ?")
            .bind(source_guild_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn server_link_by_target(&self, target_server_id: &str) -> BridgeResult<Option<ServerLink>> {
        Ok(sqlx::query_as::<_, ServerLink>("SELECT * FROM server_links WHERE target_server_id = ?")
            .bind(target_server_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // ---- channel links -----------------------------------------------------

    pub async fn upsert_channel_link(
        &self,
        source_channel_id: &str,
        target_channel_id: &str,
        webhook_id: Option<&str>,
        webhook_token: Option<&str>,
    ) -> BridgeResult<ChannelLink> {
        sqlx::query(
            "INSERT INTO channel_links (source_channel_id, target_channel_id, webhook_id, webhook_token, active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)
             ON CONFLICT(source_channel_id) DO UPDATE SET
                target_channel_id = excluded.target_channel_id,
                webhook_id = excluded.webhook_id,
                webhook_token = excluded.webhook_token,
                active = 1",
        )
        .bind(source_channel_id)
        .bind(target_channel_id)
        .bind(webhook_id)
        .bind(webhook_token)
        .bind(now())
        .execute(&self.pool)
        .await?;
        self.channel_link_by_source(source_channel_id)
            .await?
            .ok_or_else(|| BridgeError::Storage { error: "channel link vanished after upsert".into() })
    }

    pub async fn channel_link_by_source(&self, source_channel_id: &str) -> BridgeResult<Option<ChannelLink>> {
        Ok(sqlx::query_as::<_, ChannelLink>("SELECT * FROM channel_links WHERE source_channel_id = ? AND active = 1")
            .bind(source_channel_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn channel_link_by_target(&self, target_channel_id: &str) -> BridgeResult<Option<ChannelLink>> {
        Ok(sqlx::query_as::<_, ChannelLink>("SELECT * FROM channel_links WHERE target_channel_id = ? AND active = 1")
            .bind(target_channel_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn all_active_channel_links(&self) -> BridgeResult<Vec<ChannelLink>> {
        Ok(sqlx::query_as::<_, ChannelLink>("SELECT * FROM channel_links WHERE active = 1")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn update_bridge_cursor(
        &self,
        channel_link_id: i64,
        last_source_id: Option<&str>,
        last_target_id: Option<&str>,
    ) -> BridgeResult<()> {
        sqlx::query(
            "UPDATE channel_links SET
                last_bridged_source_id = COALESCE(?, last_bridged_source_id),
                last_bridged_target_id = COALESCE(?, last_bridged_target_id),
                last_bridged_at = ?
             WHERE id = ?",
        )
        .bind(last_source_id)
        .bind(last_target_id)
        .bind(now())
        .bind(channel_link_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- role links ---------------------------------------------------------

    pub async fn upsert_role_link(&self, source_role_id: &str, target_role_id: &str, source_guild_id: &str) -> BridgeResult<()> {
        sqlx::query(
            "INSERT INTO role_links (source_role_id, target_role_id, source_guild_id) VALUES (?, ?, ?)
             ON CONFLICT(source_role_id) DO UPDATE SET target_role_id = excluded.target_role_id",
        )
        .bind(source_role_id)
        .bind(target_role_id)
        .bind(source_guild_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn role_links_for_guild(&self, source_guild_id: &str) -> BridgeResult<Vec<RoleLink>> {
        Ok(sqlx::query_as::<_, RoleLink>("SELECT * FROM role_links WHERE source_guild_id = ?")
            .bind(source_guild_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // ---- bridge message pairs ------------------------------------------------

    /// Upsert on `source_message_id`, per the pair-uniqueness invariant.
    pub async fn store_bridge_message(
        &self,
        source_message_id: &str,
        target_message_id: &str,
        source_channel_id: &str,
        target_channel_id: &str,
        direction: BridgeDirection,
    ) -> BridgeResult<()> {
        sqlx::query(
            "INSERT INTO bridge_messages (source_message_id, target_message_id, source_channel_id, target_channel_id, direction, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_message_id) DO UPDATE SET
                target_message_id = excluded.target_message_id,
                direction = excluded.direction,
                created_at = excluded.created_at",
        )
        .bind(source_message_id)
        .bind(target_message_id)
        .bind(source_channel_id)
        .bind(target_channel_id)
        .bind(direction)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn pair_by_source(&self, source_message_id: &str) -> BridgeResult<Option<BridgeMessage>> {
        Ok(sqlx::query_as::<_, BridgeMessage>("SELECT * FROM bridge_messages WHERE source_message_id = ?")
            .bind(source_message_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn pair_by_target(&self, target_message_id: &str) -> BridgeResult<Option<BridgeMessage>> {
        Ok(sqlx::query_as::<_, BridgeMessage>("SELECT * FROM bridge_messages WHERE target_message_id = ?")
            .bind(target_message_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn delete_pair_by_target(&self, target_message_id: &str) -> BridgeResult<()> {
        sqlx::query("DELETE FROM bridge_messages WHERE target_message_id = ?")
            .bind(target_message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_pair_by_source(&self, source_message_id: &str) -> BridgeResult<()> {
        sqlx::query("DELETE FROM bridge_messages WHERE source_message_id = ?")
            .bind(source_message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Pruning uses a sequential scan; there is no `created_at` index, so
    /// large deployments should add one.
    pub async fn prune_bridge_messages(&self, older_than_days: i64) -> BridgeResult<u64> {
        let cutoff = now() - older_than_days * 86_400;
        let result = sqlx::query("DELETE FROM bridge_messages WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---- claim codes ----------------------------------------------------------

    pub async fn create_claim_code(&self, code: &str, target_server_id: &str, created_by: &str, created_in: &str) -> BridgeResult<()> {
        sqlx::query(
            "INSERT INTO claim_codes (code, target_server_id, created_by, created_in, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(code)
        .bind(target_server_id)
        .bind(created_by)
        .bind(created_in)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic consumption: `UPDATE ... WHERE code = ? AND used_by_guild IS NULL`.
    /// Returns the target server id on success, `None` if another caller won the race
    /// or the code doesn't exist / has expired.
    pub async fn consume_claim_code(&self, code: &str, guild_id: &str, user_id: &str) -> BridgeResult<Option<String>> {
        let normalized = code.to_uppercase();
        let Some(row) = sqlx::query_as::<_, ClaimCode>("SELECT * FROM claim_codes WHERE code = ?")
            .bind(&normalized)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        if row.is_expired(now()) {
            return Ok(None);
        }

        let result = sqlx::query(
            "UPDATE claim_codes SET used_by_guild = ?, used_by_user = ?, used_at = ? WHERE code = ? AND used_by_guild IS NULL",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(now())
        .bind(&normalized)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!("claim code {normalized} lost the consumption race");
            return Ok(None);
        }
        Ok(Some(row.target_server_id))
    }

    pub async fn claim_code_creator(&self, code: &str) -> BridgeResult<Option<String>> {
        Ok(sqlx::query_scalar("SELECT created_by FROM claim_codes WHERE code = ?")
            .bind(code.to_uppercase())
            .fetch_optional(&self.pool)
            .await?)
    }

    // ---- migration requests ---------------------------------------------------

    pub async fn cancel_pending_migration_requests(&self, target_server_id: &str) -> BridgeResult<()> {
        sqlx::query(
            "UPDATE migration_requests SET status = 'cancelled', resolved_at = ? WHERE target_server_id = ? AND status = 'pending'",
        )
        .bind(now())
        .bind(target_server_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_migration_request(
        &self,
        source_guild_id: &str,
        source_guild_name: &str,
        source_user_id: &str,
        source_user_name: &str,
        target_server_id: &str,
        target_channel_id: &str,
    ) -> BridgeResult<i64> {
        let row = sqlx::query(
            "INSERT INTO migration_requests
                (source_guild_id, source_guild_name, source_user_id, source_user_name, target_server_id, target_channel_id, status, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
             RETURNING id",
        )
        .bind(source_guild_id)
        .bind(source_guild_name)
        .bind(source_user_id)
        .bind(source_user_name)
        .bind(target_server_id)
        .bind(target_channel_id)
        .bind(now())
        .bind(now() + 300)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    pub async fn set_migration_request_message(&self, id: i64, target_message_id: &str) -> BridgeResult<()> {
        sqlx::query("UPDATE migration_requests SET target_message_id = ? WHERE id = ?")
            .bind(target_message_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn migration_request_by_message(&self, target_message_id: &str) -> BridgeResult<Option<MigrationRequest>> {
        Ok(sqlx::query_as::<_, MigrationRequest>(
            "SELECT * FROM migration_requests WHERE target_message_id = ? AND status = 'pending'",
        )
        .bind(target_message_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn resolve_migration_request(&self, id: i64, status: MigrationStatus, approved_by: Option<&str>) -> BridgeResult<()> {
        sqlx::query("UPDATE migration_requests SET status = ?, approved_by = ?, resolved_at = ? WHERE id = ?")
            .bind(status)
            .bind(approved_by)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- archive jobs ------------------------------------------------------------

    pub async fn active_export_job(&self, source_channel_id: &str) -> BridgeResult<Option<ArchiveJob>> {
        Ok(sqlx::query_as::<_, ArchiveJob>(
            "SELECT * FROM archive_jobs WHERE source_channel_id = ? AND direction = 'export' AND status IN ('pending', 'running', 'paused')",
        )
        .bind(source_channel_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn create_archive_job(
        &self,
        guild_id: &str,
        source_channel_id: &str,
        source_channel_name: &str,
        target_channel_id: Option<&str>,
        direction: ArchiveDirection,
    ) -> BridgeResult<i64> {
        let row = sqlx::query(
            "INSERT INTO archive_jobs (guild_id, source_channel_id, source_channel_name, target_channel_id, direction, status, started_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?) RETURNING id",
        )
        .bind(guild_id)
        .bind(source_channel_id)
        .bind(source_channel_name)
        .bind(target_channel_id)
        .bind(direction)
        .bind(now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    pub async fn update_archive_progress(
        &self,
        job_id: i64,
        status: ArchiveStatus,
        processed_messages: i64,
        last_message_id: Option<&str>,
    ) -> BridgeResult<()> {
        sqlx::query(
            "UPDATE archive_jobs SET status = ?, processed_messages = ?, last_message_id = COALESCE(?, last_message_id) WHERE id = ?",
        )
        .bind(status)
        .bind(processed_messages)
        .bind(last_message_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_archive_job(&self, job_id: i64, status: ArchiveStatus, error: Option<&str>) -> BridgeResult<()> {
        sqlx::query("UPDATE archive_jobs SET status = ?, error = ?, completed_at = ? WHERE id = ?")
            .bind(status)
            .bind(error)
            .bind(now())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn archive_job(&self, job_id: i64) -> BridgeResult<Option<ArchiveJob>> {
        Ok(sqlx::query_as::<_, ArchiveJob>("SELECT * FROM archive_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Bulk insert within a single transaction using `INSERT OR IGNORE`, returning
    /// the number of rows actually inserted so a resumed export doesn't double-count
    /// rows it already has.
    pub async fn store_archive_messages(&self, job_id: i64, messages: &[NewArchiveMessage]) -> BridgeResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for message in messages {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO archive_messages
                    (job_id, source_message_id, author_id, author_name, author_avatar, content, timestamp, edited_timestamp, reply_to_id, attachments_json, embeds_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(job_id)
            .bind(&message.source_message_id)
            .bind(&message.author_id)
            .bind(&message.author_name)
            .bind(&message.author_avatar)
            .bind(&message.content)
            .bind(message.timestamp)
            .bind(message.edited_timestamp)
            .bind(&message.reply_to_id)
            .bind(&message.attachments_json)
            .bind(&message.embeds_json)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn unimported_archive_messages(&self, job_id: i64, limit: i64) -> BridgeResult<Vec<ArchiveMessage>> {
        Ok(sqlx::query_as::<_, ArchiveMessage>(
            "SELECT * FROM archive_messages WHERE job_id = ? AND target_message_id IS NULL ORDER BY timestamp ASC LIMIT ?",
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn mark_archive_message_imported(&self, id: i64, target_message_id: &str) -> BridgeResult<()> {
        sqlx::query("UPDATE archive_messages SET target_message_id = ?, imported_at = ? WHERE id = ?")
            .bind(target_message_id)
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn imported_target_id_for_source(&self, job_id: i64, source_message_id: &str) -> BridgeResult<Option<String>> {
        Ok(sqlx::query_scalar(
            "SELECT target_message_id FROM archive_messages WHERE job_id = ? AND source_message_id = ? AND target_message_id IS NOT NULL",
        )
        .bind(job_id)
        .bind(source_message_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten())
    }

    // ---- push devices --------------------------------------------------------------

    pub async fn upsert_push_device(&self, device: &NewPushDevice) -> BridgeResult<()> {
        sqlx::query(
            "INSERT INTO push_devices
                (target_user_id, device_id, transport, fcm_token, webpush_endpoint, webpush_p256dh, webpush_auth, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET
                target_user_id = excluded.target_user_id,
                transport = excluded.transport,
                fcm_token = excluded.fcm_token,
                webpush_endpoint = excluded.webpush_endpoint,
                webpush_p256dh = excluded.webpush_p256dh,
                webpush_auth = excluded.webpush_auth,
                updated_at = excluded.updated_at",
        )
        .bind(&device.target_user_id)
        .bind(&device.device_id)
        .bind(device.transport)
        .bind(&device.fcm_token)
        .bind(&device.webpush_endpoint)
        .bind(&device.webpush_p256dh)
        .bind(&device.webpush_auth)
        .bind(now())
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn devices_for_user(&self, target_user_id: &str) -> BridgeResult<Vec<PushDevice>> {
        Ok(sqlx::query_as::<_, PushDevice>("SELECT * FROM push_devices WHERE target_user_id = ?")
            .bind(target_user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn evict_device(&self, device_id: &str) -> BridgeResult<()> {
        sqlx::query("DELETE FROM push_devices WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Input shape for [`Store::store_archive_messages`]; kept separate from
/// [`ArchiveMessage`] since the id/target fields don't exist until insert.
pub struct NewArchiveMessage {
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
}

pub struct NewPushDevice {
    pub target_user_id: String,
    pub device_id: String,
    pub transport: PushTransport,
    pub fcm_token: Option<String>,
    pub webpush_endpoint: Option<String>,
    pub webpush_p256dh: Option<String>,
    pub webpush_auth: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_to_one_server_link_binding() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .create_server_link("guild-1", "target-1", Some("u1"), None, "new_server")
            .await
            .unwrap();
        let err = store
            .create_server_link("guild-2", "target-1", Some("u2"), None, "new_server")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Conflict { .. }));
    }

    #[tokio::test]
    async fn bridge_message_upsert_replaces_row() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .store_bridge_message("s1", "t1", "sc1", "tc1", BridgeDirection::SourceToTarget)
            .await
            .unwrap();
        store
            .store_bridge_message("s1", "t2", "sc1", "tc1", BridgeDirection::SourceToTarget)
            .await
            .unwrap();
        let pair = store.pair_by_source("s1").await.unwrap().unwrap();
        assert_eq!(pair.target_message_id, "t2");
        assert!(store.pair_by_target("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_code_consumption_is_atomic() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_claim_code("ABC234", "target-1", "owner", "guild-0").await.unwrap();

        let a = store.consume_claim_code("abc234", "guild-a", "user-a").await.unwrap();
        let b = store.consume_claim_code("abc234", "guild-b", "user-b").await.unwrap();

        assert!(a.is_some());
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn archive_bulk_insert_is_idempotent_on_resume() {
        let store = Store::open_in_memory().await.unwrap();
        let job_id = store
            .create_archive_job("guild-1", "chan-1", "general", None, ArchiveDirection::Export)
            .await
            .unwrap();
        let message = NewArchiveMessage {
            source_message_id: "m1".into(),
            author_id: "a1".into(),
            author_name: "Alice".into(),
            author_avatar: None,
            content: "hi".into(),
            timestamp: 1,
            edited_timestamp: None,
            reply_to_id: None,
            attachments_json: "[]".into(),
            embeds_json: "[]".into(),
        };
        let first = store.store_archive_messages(job_id, std::slice::from_ref(&message)).await.unwrap();
        let second = store.store_archive_messages(job_id, std::slice::from_ref(&message)).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
