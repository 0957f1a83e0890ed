// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! REST client for the target platform.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ratelimit::{bucket_key, Ratelimiter};
use crate::errors::{BridgeError, BridgeResult};

#[derive(Clone)]
pub struct TargetRest {
    http: reqwest::Client,
    api_base: String,
    cdn_base: String,
    token: String,
    ratelimiter: Arc<Ratelimiter>,
}

impl TargetRest {
    pub fn new(api_base: String, cdn_base: String, token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("building the target http client should never fail");
        Self {
            http,
            api_base,
            cdn_base,
            token,
            ratelimiter: Arc::new(Ratelimiter::new()),
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> BridgeResult<Option<Value>> {
        let bucket = bucket_key(path);
        let url = format!("{}{path}", self.api_base);

        loop {
            self.ratelimiter.wait_for_capacity(&bucket).await;

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("x-bot-token", &self.token);
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            self.ratelimiter.observe(&bucket, &response);

            if response.status().as_u16() == 429 {
                let retry_after = Ratelimiter::retry_after_ms(&response);
                debug!("429 on {path}, retrying after {retry_after}ms");
                tokio::time::sleep(Duration::from_millis(retry_after)).await;
                continue;
            }

            return self.finish(response).await;
        }
    }

    async fn finish(&self, response: reqwest::Response) -> BridgeResult<Option<Value>> {
        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(None);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BridgeError::NotFound { what: response.url().path().to_string() });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Authorization { error: body });
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Validation { error: body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Transport { error: format!("{status}: {body}") });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    pub async fn get(&self, path: &str) -> BridgeResult<Option<Value>> {
        self.send(reqwest::Method::GET, path, None).await
    }

    pub async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> BridgeResult<Option<T>> {
        match self.get(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn post(&self, path: &str, body: Value) -> BridgeResult<Option<Value>> {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> BridgeResult<Option<Value>> {
        self.send(reqwest::Method::PATCH, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> BridgeResult<Option<Value>> {
        self.send(reqwest::Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> BridgeResult<()> {
        match self.send(reqwest::Method::DELETE, path, None).await {
            Ok(_) => Ok(()),
            Err(BridgeError::NotFound { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    /// Uploads a single file to the autumn-style CDN sidecar and returns its
    /// file-id.
    pub async fn upload_file(&self, tag: &str, filename: &str, bytes: Vec<u8>) -> BridgeResult<String> {
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let url = format!("{}/{tag}", self.cdn_base);
        let response = self
            .http
            .post(&url)
            .header("x-bot-token", &self.token)
            .multipart(form)
            .send()
            .await?;
        let value = self.finish(response).await?.ok_or_else(|| BridgeError::Transport {
            error: "cdn upload returned no body".to_string(),
        })?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Transport { error: "cdn upload response missing id".to_string() })
    }
}
