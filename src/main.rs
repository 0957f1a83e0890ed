// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process entry point: load configuration, open the store, wire every
//! component together, and run until shutdown.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use chatbridge::config::Config;
use chatbridge::echo_guard::EchoGuard;
use chatbridge::errors::BridgeResult;
use chatbridge::migration::authorizer::{Authorizer, Rendezvous};
use chatbridge::push::fanout::PushFanout;
use chatbridge::push::fcm::{FcmClient, ServiceAccount};
use chatbridge::push::webpush::WebPushDispatcher;
use chatbridge::recovery;
use chatbridge::relay::RelayEngine;
use chatbridge::source::events::SourceEvent;
use chatbridge::source::{normalize_message, SourceRest};
use chatbridge::store::Store;
use chatbridge::target::events::InboundEvent;
use chatbridge::target::rest::TargetRest;
use chatbridge::target::TargetClient;

#[tokio::main]
async fn main() -> BridgeResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    info!("starting chatbridge, db at {}", config.db_path);

    let store = Arc::new(Store::open(&config.db_path).await?);
    let echo_guard = Arc::new(EchoGuard::new());
    let source_rest = Arc::new(SourceRest::new(config.source_token.clone()));
    let target_client = Arc::new(TargetClient::new(
        config.target_api_base.clone(),
        config.target_cdn_url.clone(),
        config.target_ws_url.clone(),
        config.target_token.clone(),
    ));

    let relay = Arc::new(RelayEngine::new(store.clone(), source_rest.clone(), target_client.rest.clone(), echo_guard.clone()));
    let rendezvous = Rendezvous::new();
    let authorizer = Arc::new(Authorizer::new(store.clone(), target_client.rest.clone(), rendezvous.clone()));

    let push_fanout = build_push_fanout(&config, store.clone(), target_client.rest.clone());

    let (source_tx, mut source_rx) = mpsc::channel::<SourceEvent>(256);
    let (target_tx, mut target_rx) = mpsc::channel::<InboundEvent>(256);

    let source_gateway_handle = {
        let token = config.source_token.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = chatbridge::source::gateway::run(token.clone(), source_tx.clone()).await {
                    warn!("source gateway loop ended with error: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        })
    };

    let target_gateway_handle = {
        let client = target_client.clone();
        let target_tx_for_run = target_tx.clone();
        tokio::spawn(async move {
            let result = client
                .run(target_tx_for_run, || {})
                .await;
            if let Err(e) = result {
                error!("target gateway exhausted reconnects: {e}");
            }
        })
    };

    let source_dispatch_handle = {
        let relay = relay.clone();
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(event) = source_rx.recv().await {
                if let Err(e) = handle_source_event(&relay, &store, event).await {
                    warn!("source event handling failed: {e}");
                }
            }
        })
    };

    let target_dispatch_handle = {
        let relay = relay.clone();
        let authorizer = authorizer.clone();
        let store = store.clone();
        let target_client = target_client.clone();
        let source_rest = source_rest.clone();
        tokio::spawn(async move {
            while let Some(event) = target_rx.recv().await {
                if let Err(e) = handle_target_event(&relay, &authorizer, &push_fanout, &store, &target_client, &source_rest, event).await {
                    warn!("target event handling failed: {e}");
                }
            }
        })
    };

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutdown requested");

    // Cascading cleanup order: stop accepting new work, reject pending
    // approvals, close the gateway, then the store.
    source_gateway_handle.abort();
    target_gateway_handle.abort();
    source_dispatch_handle.abort();
    target_dispatch_handle.abort();
    rendezvous.reject_all_for_shutdown().await;

    info!("shutdown complete");
    Ok(())
}

fn build_push_fanout(config: &Config, store: Arc<Store>, target_rest: Arc<TargetRest>) -> Arc<PushFanout> {
    let fcm = if config.push_enabled {
        load_service_account(config).map(FcmClient::new)
    } else {
        None
    };
    let webpush = Arc::new(WebPushDispatcher::new(config.vapid_private_key.clone()));
    Arc::new(PushFanout::new(store, target_rest, fcm, webpush))
}

fn load_service_account(config: &Config) -> Option<ServiceAccount> {
    let raw = if let Some(inline) = &config.firebase_sa_json {
        inline.clone()
    } else {
        std::fs::read_to_string(config.firebase_service_account.as_ref()?).ok()?
    };
    serde_json::from_str(&raw).ok()
}

async fn handle_source_event(relay: &RelayEngine, store: &Store, event: SourceEvent) -> BridgeResult<()> {
    match event {
        SourceEvent::MessageCreate(raw) => {
            let Some(message) = normalize_message(&raw) else { return Ok(()) };
            let Some(link) = store.channel_link_by_source(&message.channel_id).await? else { return Ok(()) };
            relay.relay_source_to_target(link.id, &link.target_channel_id, &message, "", true).await?;
        }
        SourceEvent::MessageUpdate(raw) => {
            let Some(message) = normalize_message(&raw) else { return Ok(()) };
            relay.sync_edit_from_source(&message.id, &message.content).await?;
        }
        SourceEvent::MessageDelete { id, .. } => {
            relay.sync_delete_from_source(&id).await?;
        }
    }
    Ok(())
}

async fn handle_target_event(
    relay: &RelayEngine,
    authorizer: &Authorizer,
    push: &PushFanout,
    store: &Store,
    target_client: &TargetClient,
    source_rest: &SourceRest,
    event: InboundEvent,
) -> BridgeResult<()> {
    match event {
        InboundEvent::Ready(_) => {
            info!("target gateway ready, running outage recovery");
            recovery::recover_all(store, relay, source_rest, &target_client.rest).await?;
        }
        InboundEvent::Message(message) => {
            if !message.replies.is_empty() {
                authorizer.handle_reply(&message).await?;
            }
            let bot_user_id = target_client.shared.bot_user_id.lock().await.clone().unwrap_or_default();
            push.handle_message(&message, &bot_user_id).await?;
            relay.relay_target_to_source(&message, "", true).await?;
        }
        InboundEvent::MessageUpdate(update) => {
            if let Some(content) = update.data.get("content").and_then(|v| v.as_str()) {
                relay.sync_edit_from_target(&update.id, content).await?;
            }
        }
        InboundEvent::MessageDelete(delete) => {
            relay.sync_delete_from_target(&delete.id).await?;
        }
        _ => {}
    }
    Ok(())
}
