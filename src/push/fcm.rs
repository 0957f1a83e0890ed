// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FCM dispatch with a JWT-for-service-account bearer token.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::{BridgeError, BridgeResult};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_REFRESH_SKEW: i64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    pub project_id: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    TOKEN_URL.to_string()
}

#[derive(Serialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

pub struct FcmClient {
    http: reqwest::Client,
    service_account: ServiceAccount,
    cached: Mutex<Option<CachedToken>>,
}

impl FcmClient {
    pub fn new(service_account: ServiceAccount) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            service_account,
            cached: Mutex::new(None),
        })
    }

    fn now() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
    }

    async fn bearer_token(&self, force_refresh: bool) -> BridgeResult<String> {
        {
            let cached = self.cached.lock().await;
            if !force_refresh {
                if let Some(cached) = cached.as_ref() {
                    if cached.expires_at > Self::now() {
                        return Ok(cached.token.clone());
                    }
                }
            }
        }

        let now = Self::now();
        let claims = Claims {
            iss: self.service_account.client_email.clone(),
            scope: "https://www.googleapis.com/auth/firebase.messaging".to_string(),
            aud: self.service_account.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.service_account.private_key.as_bytes())
            .map_err(|e| BridgeError::Config { error: format!("invalid firebase private key: {e}") })?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| BridgeError::Config { error: format!("failed to sign firebase assertion: {e}") })?;

        let response: TokenResponse = self
            .http
            .post(&self.service_account.token_uri)
            .form(&[("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"), ("assertion", &assertion)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let expires_at = now + response.expires_in - TOKEN_REFRESH_SKEW;
        *self.cached.lock().await = Some(CachedToken { token: response.access_token.clone(), expires_at });
        Ok(response.access_token)
    }

    /// Returns `Ok(true)` on success, `Ok(false)` if the device should be
    /// evicted (404/UNREGISTERED), or an error for anything else that should
    /// keep the device around.
    pub async fn send(&self, fcm_token: &str, payload: &Value) -> BridgeResult<bool> {
        self.send_inner(fcm_token, payload, false).await
    }

    async fn send_inner(&self, fcm_token: &str, payload: &Value, is_retry: bool) -> BridgeResult<bool> {
        let bearer = self.bearer_token(false).await?;
        let url = format!("https://fcm.googleapis.com/v1/projects/{}/messages:send", self.service_account.project_id);
        let body = serde_json::json!({
            "message": {
                "token": fcm_token,
                "data": { "payload": payload.to_string() },
                "android": { "priority": "high" },
            }
        });

        let response = self.http.post(&url).bearer_auth(bearer).json(&body).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED && !is_retry {
            self.bearer_token(true).await?;
            return Box::pin(self.send_inner(fcm_token, payload, true)).await;
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.contains("UNREGISTERED") {
                return Ok(false);
            }
            warn!("fcm send failed ({status}): {text}");
            return Err(BridgeError::Transport { error: format!("fcm send failed: {status}") });
        }
        Ok(true)
    }
}
