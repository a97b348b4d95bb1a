//! HTTP transport over a shared reqwest client.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use tracing::debug;

use super::{Transport, TransportResponse};
use crate::cancel::AttemptToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{OneShotReply, RequestPayload};

static SHARED_CLIENT: OnceLock<std::result::Result<reqwest::Client, String>> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No overall request timeout is set: attempt deadlines are enforced by the
/// engine so a long stream is not cut by the client.
pub fn shared_client() -> Result<reqwest::Client> {
    SHARED_CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .pool_max_idle_per_host(10)
                .build()
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| EngineError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Build request headers, with Bearer auth when a key is configured.
pub fn request_headers(api_key: Option<&str>, streaming: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(if streaming {
            "application/x-ndjson"
        } else {
            "application/json"
        }),
    );
    if let Some(key) = api_key {
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    headers
}

/// Map a non-success status to an error.
pub fn status_to_error(status: u16, retry_after: Option<&str>, body: &str) -> EngineError {
    match status {
        429 => EngineError::RateLimited {
            retry_after_ms: retry_after.and_then(parse_retry_after),
        },
        _ => {
            let message = extract_error_message(body).unwrap_or_else(|| body.to_string());
            EngineError::api(status, message)
        }
    }
}

fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

fn extract_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<serde_json::Value>(body).ok()?;
    let error = value.get("error").unwrap_or(&value);
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

/// POSTs the payload to a single endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(
        &self,
        request: &RequestPayload,
        token: &AttemptToken,
    ) -> Result<TransportResponse> {
        debug!(endpoint = %self.endpoint, stream = request.stream, history = request.history.len(), "issuing request");

        let send = shared_client()?
            .post(&self.endpoint)
            .headers(request_headers(self.api_key.as_deref(), request.stream))
            .json(request)
            .send();

        let resp = tokio::select! {
            _ = token.cancelled() => {
                return Err(EngineError::Cancelled(
                    token.reason().unwrap_or(crate::cancel::CancelReason::UserStop),
                ));
            }
            resp = send => resp?,
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, retry_after.as_deref(), &body_text));
        }

        if !request.stream {
            let body = resp.text().await?;
            let reply: OneShotReply = serde_json::from_str(&body)?;
            return Ok(TransportResponse::Complete(reply));
        }

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(EngineError::Network));
        Ok(TransportResponse::Stream(Box::pin(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limited_with_retry_after() {
        match status_to_error(429, Some("2"), "") {
            EngineError::RateLimited { retry_after_ms } => assert_eq!(retry_after_ms, Some(2000)),
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn json_error_bodies_are_unwrapped() {
        let err = status_to_error(503, None, r#"{"error":{"message":"upstream down"}}"#);
        assert_eq!(err.to_string(), "API error (status 503): upstream down");

        let err = status_to_error(500, None, "plain failure");
        assert_eq!(err.to_string(), "API error (status 500): plain failure");
    }

    #[test]
    fn headers_include_bearer_when_keyed() {
        let headers = request_headers(Some("k"), true);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer k");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/x-ndjson");
        assert!(request_headers(None, false).get(AUTHORIZATION).is_none());
    }
}
