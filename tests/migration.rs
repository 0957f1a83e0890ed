//! Migration authorization and execution against a mocked target server.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use httptest::matchers::request;
use httptest::responders::json_encoded;
use httptest::{Expectation, Server};

use chatbridge::migration::authorizer::{Authorizer, Rendezvous};
use chatbridge::migration::executor::{MigrationExecutor, SourceChannel, SourceGuildSnapshot, SourceRole};
use chatbridge::migration::types::{MigrationMode, MigrationOptions};
use chatbridge::target::rest::TargetRest;

#[tokio::test]
async fn authorize_new_server_creates_a_server_and_records_the_link() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("POST", "/servers/create"))
            .respond_with(json_encoded(serde_json::json!({ "_id": "newserver1" }))),
    );

    let store = Arc::new(common::open_temp_store("authorize_new").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let rendezvous = Rendezvous::new();
    let authorizer = Authorizer::new(store.clone(), target, rendezvous);

    let target_server_id = authorizer
        .authorize("guild-1", "My Guild", "user-1", "Alice", None, None)
        .await
        .unwrap();
    assert_eq!(target_server_id, "newserver1");

    let link = store.server_link_by_source("guild-1").await.unwrap().unwrap();
    assert_eq!(link.target_server_id, "newserver1");
    assert_eq!(link.auth_method, "new_server");
}

#[tokio::test]
async fn authorize_claim_code_requires_an_unused_code() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("GET", "/servers/target-9"))
            .respond_with(json_encoded(serde_json::json!({ "_id": "target-9" }))),
    );

    let store = Arc::new(common::open_temp_store("authorize_claim").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let rendezvous = Rendezvous::new();
    let authorizer = Authorizer::new(store.clone(), target, rendezvous);

    store.create_claim_code("ABC234", "target-9", "owner-1", "guild-0").await.unwrap();

    let resolved = authorizer.authorize("guild-1", "My Guild", "user-1", "Alice", Some("abc234"), None).await.unwrap();
    assert_eq!(resolved, "target-9");

    let err = authorizer.authorize("guild-2", "Other Guild", "user-2", "Bob", Some("abc234"), None).await.unwrap_err();
    assert!(matches!(err, chatbridge::errors::BridgeError::NotFound { .. }));
}

#[tokio::test]
async fn dry_run_migration_creates_nothing_and_logs_intent() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("GET", "/servers/target-1"))
            .respond_with(json_encoded(serde_json::json!({
                "_id": "target-1",
                "description": serde_json::Value::Null,
                "channels": [],
                "roles": {},
            }))),
    );

    let store = Arc::new(common::open_temp_store("dry_run_migration").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let executor = MigrationExecutor::new(store, target);

    let snapshot = SourceGuildSnapshot {
        description: None,
        roles: vec![SourceRole {
            id: "role-1".to_string(),
            name: "Admin".to_string(),
            colour: None,
            hoist: false,
            mentionable: false,
            has_custom_icon: false,
            has_unicode_emoji_icon: false,
            permissions_allow: 0,
        }],
        channels: vec![SourceChannel {
            id: "chan-1".to_string(),
            name: "general".to_string(),
            channel_type: "Text".to_string(),
            description: None,
            nsfw: false,
            category_name: Some("Text Channels".to_string()),
        }],
        ..Default::default()
    };
    let options = MigrationOptions { mode: MigrationMode::Full, dry_run: true, ..Default::default() };

    let progress = executor.execute("guild-1", "target-1", &snapshot, &options, Arc::new(AtomicBool::new(false))).await.unwrap();

    assert_eq!(progress.created, 2);
    assert_eq!(progress.updated, 0);
    assert!(progress.dry_run_log.iter().any(|line| line.contains("would create role 'Admin'")));
    assert!(progress.dry_run_log.iter().any(|line| line.contains("would create channel 'general'")));
    assert!(progress.dry_run_log.iter().any(|line| line.contains("would set 1 categories")));
}

#[tokio::test]
async fn cancelled_migration_stops_before_completion() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("GET", "/servers/target-2"))
            .respond_with(json_encoded(serde_json::json!({
                "_id": "target-2",
                "description": serde_json::Value::Null,
                "channels": [],
                "roles": {},
            }))),
    );

    let store = Arc::new(common::open_temp_store("cancelled_migration").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let executor = MigrationExecutor::new(store, target);

    let snapshot = SourceGuildSnapshot {
        roles: vec![SourceRole {
            id: "role-1".to_string(),
            name: "Admin".to_string(),
            colour: None,
            hoist: false,
            mentionable: false,
            has_custom_icon: false,
            has_unicode_emoji_icon: false,
            permissions_allow: 0,
        }],
        ..Default::default()
    };
    let options = MigrationOptions { mode: MigrationMode::Full, dry_run: true, ..Default::default() };
    let cancel = Arc::new(AtomicBool::new(true));

    let err = executor.execute("guild-1", "target-2", &snapshot, &options, cancel).await.unwrap_err();
    assert!(matches!(err, chatbridge::errors::BridgeError::Cancelled));
}
