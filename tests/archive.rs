//! Archive export/import against a mocked source REST surface.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use httptest::matchers::request;
use httptest::responders::json_encoded;
use httptest::{Expectation, Server};

use chatbridge::archive::ArchiveEngine;
use chatbridge::source::SourceRest;
use chatbridge::store::models::ArchiveStatus;
use chatbridge::store::NewArchiveMessage;
use chatbridge::target::rest::TargetRest;

fn discord_message(id: &str, author_id: &str, content: &str, timestamp: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "channel_id": "chan1",
        "author": { "id": author_id, "username": "alice" },
        "content": content,
        "timestamp": timestamp,
        "type": 0,
    })
}

#[tokio::test]
async fn export_archives_a_short_final_page_in_one_pass() {
    let source_server = Server::run();
    source_server.expect(
        Expectation::matching(request::method_path("GET", "/channels/chan1/messages"))
            .respond_with(json_encoded(serde_json::json!([
                discord_message("m2", "a1", "second", "2024-01-01T00:00:01Z"),
                discord_message("m1", "a1", "first", "2024-01-01T00:00:00Z"),
            ]))),
    );

    let store = Arc::new(common::open_temp_store("archive_export").await);
    let source = Arc::new(SourceRest::with_base("source-token".to_string(), format!("http://{}", source_server.addr())));
    let target = Arc::new(TargetRest::new("http://target.invalid".to_string(), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let engine = ArchiveEngine::new(store.clone(), source, target);

    let job_id = engine.export("guild-1", "chan1", "general", Arc::new(AtomicBool::new(false))).await.unwrap();

    let job = store.archive_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, ArchiveStatus::Completed);
    assert_eq!(job.processed_messages, 2);

    let rows = store.unimported_archive_messages(job_id, 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].source_message_id, "m1", "rows come back oldest first");
}

#[tokio::test]
async fn export_is_a_no_op_when_a_job_is_already_running() {
    let source_server = Server::run(); // no expectations: a second export call must not re-paginate

    let store = Arc::new(common::open_temp_store("archive_export_dup").await);
    let source = Arc::new(SourceRest::with_base("source-token".to_string(), format!("http://{}", source_server.addr())));
    let target = Arc::new(TargetRest::new("http://target.invalid".to_string(), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let engine = ArchiveEngine::new(store.clone(), source, target);

    let existing_id = store
        .create_archive_job("guild-1", "chan1", "general", None, chatbridge::store::models::ArchiveDirection::Export)
        .await
        .unwrap();

    let job_id = engine.export("guild-1", "chan1", "general", Arc::new(AtomicBool::new(false))).await.unwrap();
    assert_eq!(job_id, existing_id);
}

#[tokio::test]
async fn import_sends_each_unimported_row_to_the_target_channel() {
    let source_server = Server::run(); // no expectations: import never touches the source platform
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("POST", "/channels/target-chan/messages"))
            .respond_with(json_encoded(serde_json::json!({ "_id": "target-msg-1" }))),
    );

    let store = Arc::new(common::open_temp_store("archive_import").await);
    let source = Arc::new(SourceRest::with_base("source-token".to_string(), format!("http://{}", source_server.addr())));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let engine = ArchiveEngine::new(store.clone(), source, target);

    let job_id = store
        .create_archive_job("guild-1", "chan1", "general", Some("target-chan"), chatbridge::store::models::ArchiveDirection::Import)
        .await
        .unwrap();
    store
        .store_archive_messages(
            job_id,
            &[NewArchiveMessage {
                source_message_id: "m1".to_string(),
                author_id: "a1".to_string(),
                author_name: "Alice".to_string(),
                author_avatar: None,
                content: "hello".to_string(),
                timestamp: 1,
                edited_timestamp: None,
                reply_to_id: None,
                attachments_json: "[]".to_string(),
                embeds_json: "[]".to_string(),
            }],
        )
        .await
        .unwrap();

    engine.import(job_id, "target-chan", false, false, Arc::new(AtomicBool::new(false))).await.unwrap();

    let target_id = store.imported_target_id_for_source(job_id, "m1").await.unwrap();
    assert_eq!(target_id.as_deref(), Some("target-msg-1"));

    let job = store.archive_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, ArchiveStatus::Completed);
}
