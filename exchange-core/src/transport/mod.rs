//! Stateless HTTP POST of a batch payload (§4.4).
//!
//! `HttpTransport` is a thin `reqwest::Client` wrapper in the style of
//! `blockscout-blockscout-rs`'s `libs/api-client-framework/src/async_client.rs`:
//! a single configured client, one POST per call, response body decoded as
//! JSON. Any failure — connect, timeout, non-2xx status, malformed body —
//! collapses to `None` per §4.4 ("any protocol or network failure yields
//! `None`"), with the concrete cause logged via `tracing::warn!` rather than
//! surfaced to the caller; `TransportError` exists for the few cases a
//! caller does need to distinguish (construction-time config errors).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failures that can occur while constructing a [`HttpTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("invalid server URL {0:?}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),
}

/// One stateless exchange: post `payload`, return the server's decoded
/// response or `None` on any failure (§4.4).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, payload: &Value, computer_id: Option<&str>, message_api: &str) -> Option<Value>;
}

/// Production transport: POSTs the payload as JSON to a fixed server URL.
pub struct HttpTransport {
    client: reqwest::Client,
    server_url: reqwest::Url,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, TransportError> {
        Self::with_timeout(server_url, Duration::from_secs(60))
    }

    pub fn with_timeout(server_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let server_url = reqwest::Url::parse(server_url).map_err(|e| TransportError::InvalidUrl(server_url.to_string(), e))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::ClientBuild)?;
        Ok(Self { client, server_url })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(&self, payload: &Value, computer_id: Option<&str>, message_api: &str) -> Option<Value> {
        let mut request = self.client.post(self.server_url.clone()).json(payload);
        if let Some(computer_id) = computer_id {
            request = request.header("X-Computer-Id", computer_id);
        }
        request = request.header("X-Message-Api", message_api);

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, "transport request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "transport received non-2xx response");
            return None;
        }

        match response.json::<Value>().await {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(error = %error, "transport response body was not valid JSON");
                None
            }
        }
    }
}

/// An in-memory transport returning a queue of canned responses, so
/// exchange-cycle tests never touch the network.
#[derive(Default)]
pub struct FakeTransport {
    responses: parking_lot::Mutex<std::collections::VecDeque<Option<Value>>>,
    requests: parking_lot::Mutex<Vec<(Value, Option<String>, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response (or `None` to simulate a failed exchange).
    pub fn push_response(&self, response: Option<Value>) {
        self.responses.lock().push_back(response);
    }

    /// Every request this transport has received so far, in order.
    pub fn requests(&self) -> Vec<(Value, Option<String>, String)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn exchange(&self, payload: &Value, computer_id: Option<&str>, message_api: &str) -> Option<Value> {
        self.requests
            .lock()
            .push((payload.clone(), computer_id.map(str::to_string), message_api.to_string()));
        self.responses.lock().pop_front().flatten()
    }
}
