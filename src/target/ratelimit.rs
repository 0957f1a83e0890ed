// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bucket-keyed rate limiting for the target REST client.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use reqwest::Response;

/// One bucket's remaining-request state, as tracked from response headers.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub remaining: i64,
    pub reset_at: u64,
}

/// Derives the rate-limit bucket key for a target REST path.
///
/// `/servers/{id}/...` -> `server:{id}`, `/channels/{id}/...` -> `channel:{id}`,
/// anything else -> `global`.
pub fn bucket_key(path: &str) -> String {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("servers"), Some(id)) => format!("server:{id}"),
        (Some("channels"), Some(id)) => format!("channel:{id}"),
        _ => "global".to_string(),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Tracks `{remaining, reset_at}` per bucket and the sleep-before-send /
/// retry-after logic. One instance is shared by every caller of the target
/// REST client, since buckets are scoped globally rather than per request.
#[derive(Default)]
pub struct Ratelimiter {
    buckets: RwLock<HashMap<String, Limit>>,
}

impl Ratelimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks (async sleep) until `bucket` is clear to send, if it is currently exhausted.
    pub async fn wait_for_capacity(&self, bucket: &str) {
        let sleep_for = {
            let buckets = self.buckets.read().unwrap();
            match buckets.get(bucket) {
                Some(limit) if limit.remaining <= 0 && limit.reset_at > now_secs() => {
                    Some(Duration::from_secs(limit.reset_at - now_secs()) + Duration::from_millis(100))
                }
                _ => None,
            }
        };
        if let Some(duration) = sleep_for {
            debug!("ratelimit: sleeping {duration:?} for bucket {bucket}");
            tokio::time::sleep(duration).await;
        }
    }

    /// Updates bucket state from the response headers of a completed request.
    pub fn observe(&self, bucket: &str, response: &Response) {
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let reset_after = response
            .headers()
            .get("x-ratelimit-reset-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());

        if let (Some(remaining), Some(reset_after)) = (remaining, reset_after) {
            let reset_at = now_secs() + reset_after.ceil() as u64;
            self.buckets
                .write()
                .unwrap()
                .insert(bucket.to_string(), Limit { remaining, reset_at });
        }
    }

    /// Extracts the `retry-after` delay from a 429 response, in milliseconds.
    pub fn retry_after_ms(response: &Response) -> u64 {
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .map(|secs| (secs * 1000.0).round() as u64)
            .unwrap_or_else(|| {
                warn!("429 without a parseable retry-after, defaulting to 1000ms");
                1000
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_server_bucket() {
        assert_eq!(bucket_key("/servers/01H/channels"), "server:01H");
    }

    #[test]
    fn derives_channel_bucket() {
        assert_eq!(bucket_key("/channels/01H/messages"), "channel:01H");
    }

    #[test]
    fn falls_back_to_global() {
        assert_eq!(bucket_key("/users/@me"), "global");
    }
}
