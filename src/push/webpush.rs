// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! WebPush dispatch: RFC 8291 encryption is a black box handled by the
//! `web-push` crate; plain-POST endpoints (UnifiedPush / ntfy) get a simple
//! unauthenticated POST instead.

use log::warn;
use serde_json::Value;
use web_push::{
    ContentEncoding, SubscriptionInfo, SubscriptionKeys, VapidSignatureBuilder, WebPushClient, WebPushMessageBuilder,
};

use crate::errors::{BridgeError, BridgeResult};
use crate::store::models::PushDevice;

const TTL_SECONDS: u32 = 3600;

pub struct WebPushDispatcher {
    client: web_push::IsahcWebPushClient,
    vapid_private_key: Option<String>,
}

impl WebPushDispatcher {
    pub fn new(vapid_private_key: Option<String>) -> Self {
        Self {
            client: web_push::IsahcWebPushClient::new().expect("building the webpush client should never fail"),
            vapid_private_key,
        }
    }

    /// Returns `Ok(true)` on success, `Ok(false)` if the device should be
    /// evicted (404/410), or an error for anything else.
    pub async fn send(&self, device: &PushDevice, payload: &Value) -> BridgeResult<bool> {
        if device.is_plain_webpush() {
            return self.send_plain(device, payload).await;
        }
        self.send_encrypted(device, payload).await
    }

    async fn send_plain(&self, device: &PushDevice, payload: &Value) -> BridgeResult<bool> {
        let Some(endpoint) = &device.webpush_endpoint else { return Ok(false) };
        let http = reqwest::Client::new();
        let response = http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;
        self.classify(response.status())
    }

    async fn send_encrypted(&self, device: &PushDevice, payload: &Value) -> BridgeResult<bool> {
        let (Some(endpoint), Some(p256dh), Some(auth)) = (&device.webpush_endpoint, &device.webpush_p256dh, &device.webpush_auth) else {
            return Ok(false);
        };
        let Some(private_key) = &self.vapid_private_key else {
            warn!("webpush keys present on device but no VAPID private key configured");
            return Err(BridgeError::Config { error: "vapid_private_key not configured".into() });
        };

        let subscription = SubscriptionInfo {
            endpoint: endpoint.clone(),
            keys: SubscriptionKeys { p256dh: p256dh.clone(), auth: auth.clone() },
        };

        let sig_builder = VapidSignatureBuilder::from_base64(private_key, web_push::URL_SAFE_NO_PAD, &subscription)
            .map_err(|e| BridgeError::Config { error: format!("invalid vapid key: {e}") })?
            .build()
            .map_err(|e| BridgeError::Config { error: format!("vapid signature build failed: {e}") })?;

        let body = payload.to_string();
        let mut builder = WebPushMessageBuilder::new(&subscription);
        builder.set_payload(ContentEncoding::Aes128Gcm, body.as_bytes());
        builder.set_vapid_signature(sig_builder);
        builder.set_ttl(TTL_SECONDS);

        let message = builder
            .build()
            .map_err(|e| BridgeError::Transport { error: format!("webpush message build failed: {e}") })?;

        match self.client.send(message).await {
            Ok(()) => Ok(true),
            Err(web_push::WebPushError::EndpointNotFound) | Err(web_push::WebPushError::EndpointNotValid) => Ok(false),
            Err(e) => Err(BridgeError::Transport { error: e.to_string() }),
        }
    }

    fn classify(&self, status: reqwest::StatusCode) -> BridgeResult<bool> {
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Ok(false);
        }
        Err(BridgeError::Transport { error: format!("webpush plain post failed: {status}") })
    }
}
