// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Three-path migration authorization state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use super::types::{choose_path, AuthorizationPath};
use crate::errors::{BridgeError, BridgeResult};
use crate::store::models::MigrationStatus;
use crate::store::Store;
use crate::target::events::GatewayMessage;
use crate::target::rest::TargetRest;

/// Bit documented by the target platform's permission model. Externalized as a constant since the wire value isn't part
/// of this bridge's own surface.
const MANAGE_SERVER_BIT: u64 = 1 << 3;

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

type ApprovalResult = Result<String, BridgeError>;

/// Keyed rendezvous table bridging the authorizer's `await` with the gateway
/// dispatch task that observes the admin's reply.
pub struct Rendezvous {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalResult>>>,
}

impl Rendezvous {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn register(&self, key: String) -> oneshot::Receiver<ApprovalResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(key, tx);
        rx
    }

    pub async fn resolve(&self, key: &str, result: ApprovalResult) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(key) {
            let _ = tx.send(result);
            true
        } else {
            false
        }
    }

    /// Rejects every pending entry with a shutdown error.
    pub async fn reject_all_for_shutdown(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(BridgeError::Cancelled));
        }
    }
}

pub struct Authorizer {
    store: Arc<Store>,
    target: Arc<TargetRest>,
    rendezvous: Arc<Rendezvous>,
}

impl Authorizer {
    pub fn new(store: Arc<Store>, target: Arc<TargetRest>, rendezvous: Arc<Rendezvous>) -> Self {
        Self { store, target, rendezvous }
    }

    pub async fn authorize(
        &self,
        source_guild_id: &str,
        source_guild_name: &str,
        source_user_id: &str,
        source_user_name: &str,
        claim_code: Option<&str>,
        target_server_id: Option<&str>,
    ) -> BridgeResult<String> {
        match choose_path(claim_code, target_server_id) {
            AuthorizationPath::NewServer => self.authorize_new_server(source_guild_id, source_user_id, source_guild_name).await,
            AuthorizationPath::ClaimCode { code } => {
                self.authorize_claim_code(source_guild_id, source_user_id, &code, target_server_id).await
            }
            AuthorizationPath::LiveApproval { target_server_id } => {
                self.authorize_live_approval(source_guild_id, source_guild_name, source_user_id, source_user_name, &target_server_id).await
            }
        }
    }

    async fn authorize_new_server(&self, source_guild_id: &str, source_user_id: &str, guild_name: &str) -> BridgeResult<String> {
        let created = self
            .target
            .post("/servers/create", serde_json::json!({ "name": guild_name }))
            .await?
            .ok_or_else(|| BridgeError::Transport { error: "server creation returned no body".into() })?;
        let target_server_id = created.get("_id").and_then(Value::as_str).ok_or_else(|| BridgeError::Transport { error: "server creation missing _id".into() })?;

        self.store
            .create_server_link(source_guild_id, target_server_id, Some(source_user_id), None, "new_server")
            .await?;
        Ok(target_server_id.to_string())
    }

    async fn authorize_claim_code(&self, source_guild_id: &str, source_user_id: &str, code: &str, provided_target: Option<&str>) -> BridgeResult<String> {
        let normalized = code.to_uppercase();
        let consumed = self
            .store
            .consume_claim_code(&normalized, source_guild_id, source_user_id)
            .await?
            .ok_or_else(|| BridgeError::NotFound { what: "claim code".into() })?;

        if let Some(provided) = provided_target {
            if provided != consumed {
                return Err(BridgeError::Validation { error: "claim code does not match the provided target server".into() });
            }
        }

        self.verify_access(&consumed).await?;
        let creator = self.store.claim_code_creator(&normalized).await?;
        self.store
            .create_server_link(source_guild_id, &consumed, Some(source_user_id), creator.as_deref(), "claim_code")
            .await?;
        Ok(consumed)
    }

    async fn authorize_live_approval(
        &self,
        source_guild_id: &str,
        source_guild_name: &str,
        source_user_id: &str,
        source_user_name: &str,
        target_server_id: &str,
    ) -> BridgeResult<String> {
        self.verify_access(target_server_id).await?;
        if self.store.server_link_by_target(target_server_id).await?.is_some() {
            return Err(BridgeError::Conflict { error: format!("target server {target_server_id} is already linked") });
        }
        self.store.cancel_pending_migration_requests(target_server_id).await?;

        let channel_id = self.choose_approval_channel(target_server_id).await?;
        let request_id = self
            .store
            .create_migration_request(source_guild_id, source_guild_name, source_user_id, source_user_name, target_server_id, &channel_id)
            .await?;

        let prompt = format!(
            "**{source_guild_name}** ({source_user_name}) wants to link to this server. Reply `approve` or `deny` within 5 minutes."
        );
        let sent = self
            .target
            .post(&format!("/channels/{channel_id}/messages"), serde_json::json!({ "content": prompt }))
            .await?
            .ok_or_else(|| BridgeError::Transport { error: "approval prompt returned no body".into() })?;
        let message_id = sent.get("_id").and_then(Value::as_str).ok_or_else(|| BridgeError::Transport { error: "approval prompt missing _id".into() })?.to_string();
        self.store.set_migration_request_message(request_id, &message_id).await?;

        let receiver = self.rendezvous.register(message_id.clone()).await;
        let outcome = tokio::time::timeout(APPROVAL_TIMEOUT, receiver).await;

        match outcome {
            Ok(Ok(Ok(approver))) => {
                self.store
                    .create_server_link(source_guild_id, target_server_id, Some(source_user_id), Some(&approver), "live_approval")
                    .await?;
                Ok(target_server_id.to_string())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(BridgeError::Cancelled),
            Err(_) => {
                self.store.resolve_migration_request(request_id, MigrationStatus::Expired, None).await?;
                self.rendezvous.resolve(&message_id, Err(BridgeError::Cancelled)).await;
                Err(BridgeError::Validation { error: "live approval timed out after 5 minutes".into() })
            }
        }
    }

    async fn verify_access(&self, target_server_id: &str) -> BridgeResult<()> {
        self.target.get(&format!("/servers/{target_server_id}")).await?.ok_or_else(|| {
            BridgeError::Authorization { error: format!("bot cannot access target server {target_server_id}") }
        })?;
        Ok(())
    }

    async fn choose_approval_channel(&self, target_server_id: &str) -> BridgeResult<String> {
        let server = self
            .target
            .get(&format!("/servers/{target_server_id}"))
            .await?
            .ok_or_else(|| BridgeError::NotFound { what: "target server".into() })?;

        if let Some(preferred) = server.get("system_messages").and_then(|m| m.get("user_joined")).and_then(Value::as_str) {
            return Ok(preferred.to_string());
        }

        let channel_ids = server.get("channels").and_then(Value::as_array).cloned().unwrap_or_default();
        for channel_id in channel_ids {
            let Some(id) = channel_id.as_str() else { continue };
            if let Some(channel) = self.target.get(&format!("/channels/{id}")).await? {
                if channel.get("channel_type").and_then(Value::as_str) == Some("TextChannel") {
                    return Ok(id.to_string());
                }
            }
        }
        Err(BridgeError::NotFound { what: "a text channel to post the approval request in".into() })
    }

    /// Called from gateway dispatch when an incoming message replies to
    /// something. Resolves the pending approval if the replier is an admin
    /// and the content parses as approve/deny.
    pub async fn handle_reply(&self, message: &GatewayMessage) -> BridgeResult<()> {
        let Some(reply_id) = message.replies.first() else { return Ok(()) };
        let Some(request) = self.store.migration_request_by_message(reply_id).await? else { return Ok(()) };

        if !self.is_admin(&request.target_server_id, &message.author).await? {
            return Ok(());
        }

        let content = message.content.clone().unwrap_or_default().to_lowercase();
        let approved = matches!(content.trim(), "approve" | "yes" | "confirm");
        let denied = matches!(content.trim(), "deny" | "reject" | "no");

        if approved {
            self.store.resolve_migration_request(request.id, MigrationStatus::Approved, Some(&message.author)).await?;
            self.rendezvous.resolve(reply_id, Ok(message.author.clone())).await;
        } else if denied {
            self.store.resolve_migration_request(request.id, MigrationStatus::Rejected, Some(&message.author)).await?;
            self.rendezvous
                .resolve(reply_id, Err(BridgeError::Validation { error: "migration request denied".into() }))
                .await;
        }
        Ok(())
    }

    async fn is_admin(&self, target_server_id: &str, user_id: &str) -> BridgeResult<bool> {
        let server = self
            .target
            .get(&format!("/servers/{target_server_id}"))
            .await?
            .ok_or_else(|| BridgeError::NotFound { what: "target server".into() })?;
        if server.get("owner").and_then(Value::as_str) == Some(user_id) {
            return Ok(true);
        }

        let member = match self.target.get(&format!("/servers/{target_server_id}/members/{user_id}")).await? {
            Some(member) => member,
            None => return Ok(false),
        };
        let member_role_ids: Vec<String> = member
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| roles.iter().filter_map(|r| r.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let roles = server.get("roles").and_then(Value::as_object).cloned().unwrap_or_default();
        for role_id in member_role_ids {
            let Some(role) = roles.get(&role_id) else { continue };
            let allow_bits = role
                .get("permissions")
                .and_then(|p| p.get("a"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if allow_bits & MANAGE_SERVER_BIT != 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chooses_expected_paths() {
        assert!(matches!(choose_path(None, None), AuthorizationPath::NewServer));
        assert!(matches!(choose_path(Some("abc234"), None), AuthorizationPath::ClaimCode { .. }));
        assert!(matches!(choose_path(None, Some("t1")), AuthorizationPath::LiveApproval { .. }));
    }
}
