//! Push fan-out against a mocked target server and a mocked plain-POST
//! webpush endpoint (the un-keyed UnifiedPush/ntfy shape).

mod common;

use std::sync::Arc;

use httptest::matchers::request;
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};

use chatbridge::push::fanout::PushFanout;
use chatbridge::push::webpush::WebPushDispatcher;
use chatbridge::store::models::PushTransport;
use chatbridge::store::NewPushDevice;
use chatbridge::target::events::GatewayMessage;
use chatbridge::target::rest::TargetRest;

const MENTIONED_USER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const AUTHOR_ID: &str = "01234567890123456789012345";
const BOT_ID: &str = "BOTBOTBOTBOTBOTBOTBOTBOTBO";

fn mentioning_message() -> GatewayMessage {
    serde_json::from_value(serde_json::json!({
        "_id": "msg1",
        "channel": "chan1",
        "author": AUTHOR_ID,
        "content": format!("hey <@{MENTIONED_USER}> check this"),
    }))
    .unwrap()
}

async fn target_mocks() -> Server {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/channels/chan1"))
            .respond_with(json_encoded(serde_json::json!({ "channel_type": "TextChannel" }))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", format!("/users/{AUTHOR_ID}")))
            .respond_with(json_encoded(serde_json::json!({ "username": "alice" }))),
    );
    server
}

#[tokio::test]
async fn plain_webpush_delivery_keeps_the_device() {
    let target_server = target_mocks().await;
    let push_server = Server::run();
    push_server.expect(Expectation::matching(request::method_path("POST", "/push/dev1")).respond_with(status_code(201)));

    let store = Arc::new(common::open_temp_store("push_keep").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let webpush = Arc::new(WebPushDispatcher::new(None));
    let fanout = PushFanout::new(store.clone(), target, None, webpush);

    store
        .upsert_push_device(&NewPushDevice {
            target_user_id: MENTIONED_USER.to_string(),
            device_id: "dev1".to_string(),
            transport: PushTransport::Webpush,
            fcm_token: None,
            webpush_endpoint: Some(format!("http://{}/push/dev1", push_server.addr())),
            webpush_p256dh: None,
            webpush_auth: None,
        })
        .await
        .unwrap();

    fanout.handle_message(&mentioning_message(), BOT_ID).await.unwrap();

    let devices = store.devices_for_user(MENTIONED_USER).await.unwrap();
    assert_eq!(devices.len(), 1, "a device accepting the push must not be evicted");
}

#[tokio::test]
async fn gone_webpush_endpoint_evicts_the_device() {
    let target_server = target_mocks().await;
    let push_server = Server::run();
    push_server.expect(Expectation::matching(request::method_path("POST", "/push/dev2")).respond_with(status_code(410)));

    let store = Arc::new(common::open_temp_store("push_evict").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let webpush = Arc::new(WebPushDispatcher::new(None));
    let fanout = PushFanout::new(store.clone(), target, None, webpush);

    store
        .upsert_push_device(&NewPushDevice {
            target_user_id: MENTIONED_USER.to_string(),
            device_id: "dev2".to_string(),
            transport: PushTransport::Webpush,
            fcm_token: None,
            webpush_endpoint: Some(format!("http://{}/push/dev2", push_server.addr())),
            webpush_p256dh: None,
            webpush_auth: None,
        })
        .await
        .unwrap();

    fanout.handle_message(&mentioning_message(), BOT_ID).await.unwrap();

    let devices = store.devices_for_user(MENTIONED_USER).await.unwrap();
    assert!(devices.is_empty(), "a 410 Gone response must evict the device");
}

#[tokio::test]
async fn the_bots_own_messages_are_never_fanned_out() {
    let target_server = Server::run(); // no expectations: the author-is-bot short-circuit must not touch it
    let store = Arc::new(common::open_temp_store("push_skip_bot").await);
    let target = Arc::new(TargetRest::new(format!("http://{}", target_server.addr()), "http://cdn.invalid".to_string(), "target-token".to_string()));
    let webpush = Arc::new(WebPushDispatcher::new(None));
    let fanout = PushFanout::new(store, target, None, webpush);

    let mut message = mentioning_message();
    message.author = BOT_ID.to_string();

    fanout.handle_message(&message, BOT_ID).await.unwrap();
}
