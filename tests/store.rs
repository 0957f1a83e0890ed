//! Exercises the store against a real on-disk database file rather than the
//! library's own `#[cfg(test)]`-only in-memory constructor, since that one
//! isn't visible to an external test binary.

mod common;

use chatbridge::store::models::BridgeDirection;
use chatbridge::store::Store;

#[tokio::test]
async fn migrations_are_idempotent_across_reopen() {
    let path = common::temp_db_path("migrate");

    {
        let store = Store::open(&path).await.unwrap();
        store.create_server_link("guild-1", "target-1", Some("u1"), None, "new_server").await.unwrap();
    }

    // Reopening re-runs the migration statements against an already-migrated
    // file; it must not fail and must not disturb existing rows.
    let store = Store::open(&path).await.unwrap();
    let link = store.server_link_by_source("guild-1").await.unwrap().unwrap();
    assert_eq!(link.target_server_id, "target-1");
}

#[tokio::test]
async fn channel_link_upsert_and_cursor_lifecycle() {
    let store = common::open_temp_store("channel_link").await;

    let link = store.upsert_channel_link("source-chan", "target-chan", None, None).await.unwrap();
    assert!(link.webhook_id.is_none());
    assert!(!link.can_relay_to_source());

    let link = store.upsert_channel_link("source-chan", "target-chan", Some("hook1"), Some("tok1")).await.unwrap();
    assert!(link.can_relay_to_source());

    store.update_bridge_cursor(link.id, Some("s-msg-1"), Some("t-msg-1")).await.unwrap();
    let refreshed = store.channel_link_by_target("target-chan").await.unwrap().unwrap();
    assert_eq!(refreshed.last_bridged_source_id.as_deref(), Some("s-msg-1"));
    assert_eq!(refreshed.last_bridged_target_id.as_deref(), Some("t-msg-1"));

    store.store_bridge_message("s-msg-1", "t-msg-1", "source-chan", "target-chan", BridgeDirection::SourceToTarget).await.unwrap();
    let pair = store.pair_by_source("s-msg-1").await.unwrap().unwrap();
    assert_eq!(pair.target_message_id, "t-msg-1");

    store.delete_pair_by_source("s-msg-1").await.unwrap();
    assert!(store.pair_by_source("s-msg-1").await.unwrap().is_none());
}

#[tokio::test]
async fn all_active_channel_links_excludes_replaced_rows() {
    let store = common::open_temp_store("active_links").await;
    store.upsert_channel_link("a", "ta", None, None).await.unwrap();
    store.upsert_channel_link("b", "tb", None, None).await.unwrap();

    let links = store.all_active_channel_links().await.unwrap();
    assert_eq!(links.len(), 2);
}
