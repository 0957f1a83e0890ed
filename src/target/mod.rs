// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Target gateway client: REST, rate limits, WS session, polling fallback
//! and unified dedup.

pub mod events;
pub mod gateway;
pub mod poll;
pub mod ratelimit;
pub mod rest;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::errors::GatewayError;
use events::InboundEvent;
use gateway::{GatewaySession, GatewayShared};
use rest::TargetRest;

const RECONNECT_MAX_ATTEMPTS: u32 = 10;
const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Owns the REST client, the current WS session's shared state, and the
/// connect/run/reconnect loop. `on_event` and `on_ready` are invoked from the
/// dispatch task; handler isolation happens one layer up in the relay/push
/// wiring.
pub struct TargetClient {
    pub rest: Arc<TargetRest>,
    pub shared: Arc<GatewayShared>,
    ws_url: String,
    token: String,
}

impl TargetClient {
    pub fn new(api_base: String, cdn_base: String, ws_url: String, token: String) -> Self {
        Self {
            rest: Arc::new(TargetRest::new(api_base, cdn_base, token.clone())),
            shared: GatewayShared::new(),
            ws_url,
            token,
        }
    }

    /// Runs forever: connect, dispatch events (merging in polled messages
    /// deduped against the WS path), reconnect with exponential backoff, and
    /// repeat. Returns only if reconnect attempts are exhausted.
    pub async fn run(
        &self,
        mut events_tx: mpsc::Sender<InboundEvent>,
        mut on_ready: impl FnMut() + Send + 'static,
    ) -> Result<(), GatewayError> {
        let mut attempt = 0u32;
        loop {
            match self.run_one_session(&mut events_tx).await {
                Ok(()) => {
                    info!("target gateway session ended cleanly, reconnecting");
                    attempt = 0;
                }
                Err(GatewayError::AuthenticationFailed) => {
                    error!("target bot token rejected, not retrying");
                    return Err(GatewayError::AuthenticationFailed);
                }
                Err(e) => {
                    warn!("target gateway session failed: {e}");
                }
            }

            attempt += 1;
            if attempt > RECONNECT_MAX_ATTEMPTS {
                return Err(GatewayError::ReconnectExhausted);
            }
            let backoff = Duration::from_secs(1 << attempt.min(6)).min(RECONNECT_MAX_BACKOFF);
            tokio::time::sleep(backoff).await;
            on_ready();
        }
    }

    async fn run_one_session(&self, events_tx: &mut mpsc::Sender<InboundEvent>) -> Result<(), GatewayError> {
        let mut session = GatewaySession::connect(&self.ws_url, &self.token, self.shared.clone()).await?;
        let poll_shared = self.shared.clone();
        let poll_rest = self.rest.clone();
        let poll_tx = events_tx.clone();

        let poll_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                if *poll_shared.state.lock().await != gateway::SessionState::Running {
                    continue;
                }
                for message in poll::poll_once(&poll_rest, &poll_shared).await {
                    let fresh = poll_shared.dedup.lock().await.observe(&message.id);
                    if fresh {
                        let _ = poll_tx.send(InboundEvent::Message(message)).await;
                    }
                }
            }
        });

        let shared_for_dedup = self.shared.clone();
        let result = session
            .run(move |event| {
                let tx = events_tx.clone();
                let shared = shared_for_dedup.clone();
                async move {
                    if let InboundEvent::Message(message) = &event {
                        let fresh = shared.dedup.lock().await.observe(&message.id);
                        if !fresh {
                            return;
                        }
                    }
                    if tx.send(event).await.is_err() {
                        error!("event dispatch channel closed");
                    }
                }
            })
            .await;

        poll_handle.abort();
        result
    }
}
