// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error taxonomy shared by every component.

use custom_error::custom_error;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

custom_error! {
    #[derive(Clone)]
    pub BridgeError
    /// Network failure or timeout talking to a REST or WebSocket endpoint.
    Transport{error: String} = "transport error: {error}",
    /// 401/403 from either platform. Fatal to the current operation.
    Authorization{error: String} = "authorization failed: {error}",
    /// 404, or a lookup that legitimately came back empty.
    NotFound{what: String} = "not found: {what}",
    /// 400, a malformed request body.
    Validation{error: String} = "invalid request: {error}",
    /// 429 that the caller is not expected to retry itself.
    RateLimited{bucket: String, retry_after_ms: u64} = "rate limited on {bucket}, retry after {retry_after_ms}ms",
    /// A migration or archive job observed its cancel signal.
    Cancelled = "operation was cancelled",
    /// The persistent store failed; treated as fatal to the current call.
    Storage{error: String} = "storage error: {error}",
    /// Configuration failed to load or was missing a required value.
    Config{error: String} = "configuration error: {error}",
    /// A one-to-one invariant (server link, claim code) was violated.
    Conflict{error: String} = "conflict: {error}",
}

impl From<reqwest::Error> for BridgeError {
    fn from(value: reqwest::Error) -> Self {
        BridgeError::Transport {
            error: value.to_string(),
        }
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(value: sqlx::Error) -> Self {
        BridgeError::Storage {
            error: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(value: serde_json::Error) -> Self {
        BridgeError::Validation {
            error: value.to_string(),
        }
    }
}

custom_error! {
    /// Close-code level errors for the target gateway session.
    #[derive(Clone, PartialEq, Eq)]
    pub GatewayError
    AuthenticationFailed = "the target bot token was rejected during Authenticate",
    PongTimeout = "no Pong received within the liveness window, forcing reconnect",
    ReconnectExhausted = "exceeded the maximum number of reconnect attempts",
    CannotConnect{error: String} = "could not establish the websocket connection: {error}",
}
