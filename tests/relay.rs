//! End-to-end relay coverage against a mocked target REST server, since the
//! teacher's own integration tests assume a live local chat server that isn't
//! available here.

mod common;

use std::sync::Arc;

use httptest::matchers::{eq, json_decoded, request};
use httptest::responders::json_encoded;
use httptest::{all_of, Expectation, Server};
use serde_json::Value;

use chatbridge::echo_guard::{EchoGuard, EchoKind};
use chatbridge::model::{Attachment, Author, InboundMessage};
use chatbridge::relay::RelayEngine;
use chatbridge::source::SourceRest;
use chatbridge::store::models::BridgeDirection;
use chatbridge::target::events::GatewayMessage;
use chatbridge::target::rest::TargetRest;

fn inbound_message(id: &str, channel_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        author: Author { id: "source-user-1".to_string(), display_name: "Alice".to_string(), avatar_url: None, is_bot: false },
        content: content.to_string(),
        attachments: Vec::<Attachment>::new(),
        embeds: Vec::new(),
        reply_to_id: None,
        timestamp: 0,
        edited_timestamp: None,
        is_system: false,
        is_webhook_echo: false,
    }
}

fn gateway_message(id: &str, channel: &str, author: &str, content: &str) -> GatewayMessage {
    serde_json::from_value(serde_json::json!({
        "_id": id,
        "channel": channel,
        "author": author,
        "content": content,
    }))
    .unwrap()
}

#[tokio::test]
async fn relay_source_to_target_posts_and_records_the_pair() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(request::method_path("POST", "/channels/target-chan/messages"))
            .respond_with(json_encoded(serde_json::json!({ "_id": "TMSG1" }))),
    );

    let store = Arc::new(common::open_temp_store("relay_s2t").await);
    let source = Arc::new(SourceRest::new("source-token".to_string()));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let echo = Arc::new(EchoGuard::new());
    let relay = RelayEngine::new(store.clone(), source, target, echo);

    let link = store.upsert_channel_link("source-chan", "target-chan", None, None).await.unwrap();
    let message = inbound_message("SMSG1", "source-chan", "hello from source");

    let target_id = relay.relay_source_to_target(link.id, "target-chan", &message, "", false).await.unwrap();
    assert_eq!(target_id.as_deref(), Some("TMSG1"));

    let pair = store.pair_by_source("SMSG1").await.unwrap().unwrap();
    assert_eq!(pair.target_message_id, "TMSG1");

    let refreshed = store.channel_link_by_source("source-chan").await.unwrap().unwrap();
    assert_eq!(refreshed.last_bridged_source_id.as_deref(), Some("SMSG1"));
}

#[tokio::test]
async fn relay_source_to_target_uses_a_structured_reply_reference_when_the_pair_is_known() {
    let target_server = Server::run();
    target_server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/channels/target-chan/messages"),
            request::body(json_decoded(eq(serde_json::json!({
                "content": "hi",
                "masquerade": { "name": "Alice", "avatar": Value::Null },
                "attachments": Vec::<String>::new(),
                "replies": ["TMSG_ALICE"],
            }))))
        ])
        .respond_with(json_encoded(serde_json::json!({ "_id": "TMSG_BOB" }))),
    );

    let store = Arc::new(common::open_temp_store("relay_reply_found").await);
    let source = Arc::new(SourceRest::new("source-token".to_string()));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let echo = Arc::new(EchoGuard::new());
    let relay = RelayEngine::new(store.clone(), source, target, echo);

    let link = store.upsert_channel_link("source-chan", "target-chan", None, None).await.unwrap();
    store
        .store_bridge_message("SMSG_ALICE", "TMSG_ALICE", "source-chan", "target-chan", BridgeDirection::SourceToTarget)
        .await
        .unwrap();

    let mut message = inbound_message("SMSG_BOB", "source-chan", "hi");
    message.reply_to_id = Some("SMSG_ALICE".to_string());

    let target_id = relay.relay_source_to_target(link.id, "target-chan", &message, "", false).await.unwrap();
    assert_eq!(target_id.as_deref(), Some("TMSG_BOB"));
}

#[tokio::test]
async fn relay_source_to_target_skips_non_relayable_authors() {
    let target_server = Server::run(); // no expectations: a bot author must never reach it

    let store = Arc::new(common::open_temp_store("relay_skip_bot").await);
    let source = Arc::new(SourceRest::new("source-token".to_string()));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let echo = Arc::new(EchoGuard::new());
    let relay = RelayEngine::new(store.clone(), source, target, echo);

    let mut message = inbound_message("SMSG2", "source-chan", "hi");
    message.author.is_bot = true;

    let result = relay.relay_source_to_target(1, "target-chan", &message, "", false).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn relay_target_to_source_drops_its_own_echo() {
    let target_server = Server::run();
    let store = Arc::new(common::open_temp_store("relay_echo").await);
    let source = Arc::new(SourceRest::new("source-token".to_string()));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let echo = Arc::new(EchoGuard::new());
    echo.mark(EchoKind::Bridged, "TMSG2".to_string());
    let relay = RelayEngine::new(store.clone(), source, target, echo);

    store.upsert_channel_link("source-chan", "target-chan", Some("hook1"), Some("tok1")).await.unwrap();
    let message = gateway_message("TMSG2", "target-chan", "target-user-1", "bounced back");

    let result = relay.relay_target_to_source(&message, "", false).await.unwrap();
    assert!(result.is_none(), "a message this bridge just sent must not be relayed back");
}

#[tokio::test]
async fn relay_target_to_source_drops_unlinked_channels() {
    let target_server = Server::run();
    let store = Arc::new(common::open_temp_store("relay_unlinked").await);
    let source = Arc::new(SourceRest::new("source-token".to_string()));
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let echo = Arc::new(EchoGuard::new());
    let relay = RelayEngine::new(store, source, target, echo);

    let message = gateway_message("TMSG3", "no-such-channel", "target-user-1", "hello");
    let result = relay.relay_target_to_source(&message, "", false).await.unwrap();
    assert!(result.is_none());
}
