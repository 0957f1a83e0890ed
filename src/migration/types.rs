// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared types for the migration authorizer and executor.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationMode {
    Missing,
    Full,
    Roles,
    Categories,
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub mode: MigrationMode,
    pub dry_run: bool,
    pub include_emoji: bool,
    pub include_media: bool,
    pub include_snapshot: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            mode: MigrationMode::Missing,
            dry_run: false,
            include_emoji: false,
            include_media: false,
            include_snapshot: false,
        }
    }
}

/// Emitted after each operation during execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationProgress {
    pub total: usize,
    pub completed: usize,
    pub current_action: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub dry_run_log: Vec<String>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl MigrationProgress {
    pub fn record_error(&mut self, action: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{action}: {error}"));
    }

    pub fn record_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Authorization path chosen based on which inputs were supplied.
#[derive(Debug, Clone)]
pub enum AuthorizationPath {
    NewServer,
    ClaimCode { code: String },
    LiveApproval { target_server_id: String },
}

pub fn choose_path(claim_code: Option<&str>, target_server_id: Option<&str>) -> AuthorizationPath {
    match (claim_code, target_server_id) {
        (Some(code), _) => AuthorizationPath::ClaimCode { code: code.to_string() },
        (None, Some(target)) => AuthorizationPath::LiveApproval { target_server_id: target.to_string() },
        (None, None) => AuthorizationPath::NewServer,
    }
}
