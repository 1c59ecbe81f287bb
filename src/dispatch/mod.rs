//! Call Control Dispatcher
//!
//! Issues outbound call-control commands to the telephony provider. Each
//! command is exactly one authenticated request with a bounded timeout; any
//! retry policy belongs to the caller.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default outbound timeout. Must stay below the provider's webhook budget
/// because dispatch is awaited inside the webhook handler.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default Telnyx API base.
pub const TELNYX_API_BASE: &str = "https://api.telnyx.com/v2";

/// Any non-2xx answer, transport failure or timeout from the provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("provider error (status {status:?}): {body}")]
pub struct ProviderError {
    /// HTTP status, absent when no response was received.
    pub status: Option<u16>,
    pub body: String,
}

impl ProviderError {
    fn from_transport(err: reqwest::Error) -> Self {
        let body = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        Self { status: None, body }
    }
}

/// Dispatcher construction errors
#[derive(Error, Debug)]
pub enum DispatchConfigError {
    #[error("invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("API base URL cannot carry path segments: {0}")]
    UnsupportedBaseUrl(String),

    #[error("invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Successful provider acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

/// Call-control commands the state machine needs.
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn answer(&self, call_control_id: &str) -> Result<Ack, ProviderError>;

    async fn transfer(
        &self,
        call_control_id: &str,
        destination_uri: &str,
    ) -> Result<Ack, ProviderError>;
}

/// Telnyx Call Control v2 client.
#[derive(Debug, Clone)]
pub struct TelnyxCallControl {
    client: reqwest::Client,
    base_url: url::Url,
}

impl TelnyxCallControl {
    /// Create a client against `base_url` (normally [`TELNYX_API_BASE`]).
    pub fn new(
        api_key: &str,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, DispatchConfigError> {
        let base_url = url::Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(DispatchConfigError::UnsupportedBaseUrl(base_url.to_string()));
        }

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| DispatchConfigError::InvalidApiKey(e.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, base_url })
    }

    /// `{base}/calls/{call_control_id}/actions/{action}`
    fn action_url(&self, call_control_id: &str, action: &str) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["calls", call_control_id, "actions", action]);
        }
        url
    }

    async fn post_action(
        &self,
        call_control_id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<Ack, ProviderError> {
        let url = self.action_url(call_control_id, action);
        debug!(call_id = %call_control_id, action, "issuing call-control action");

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ack {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(ProviderError {
            status: Some(status.as_u16()),
            body,
        })
    }
}

#[async_trait]
impl CallControl for TelnyxCallControl {
    async fn answer(&self, call_control_id: &str) -> Result<Ack, ProviderError> {
        self.post_action(call_control_id, "answer", serde_json::json!({}))
            .await
    }

    async fn transfer(
        &self,
        call_control_id: &str,
        destination_uri: &str,
    ) -> Result<Ack, ProviderError> {
        self.post_action(
            call_control_id,
            "transfer",
            serde_json::json!({ "to": destination_uri }),
        )
        .await
    }
}

/// SIP URI the inbound leg is transferred to.
pub fn sip_destination(to_number: &str, sip_host: &str) -> String {
    format!("sip:{}@{}", to_number.trim(), sip_host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Seen = Arc<Mutex<Vec<(String, String, serde_json::Value, Option<String>)>>>;

    /// Spin up a fake provider that records requests and answers with `status`.
    async fn fake_provider(status: StatusCode, delay: Duration) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));

        async fn handle(
            State((seen, status, delay)): State<(Seen, StatusCode, Duration)>,
            Path((id, action)): Path<(String, String)>,
            headers: AxumHeaders,
            Json(body): Json<serde_json::Value>,
        ) -> (StatusCode, &'static str) {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.lock().push((id, action, body, auth));
            tokio::time::sleep(delay).await;
            (status, "{\"errors\":[]}")
        }

        let app = Router::new()
            .route("/v2/calls/{id}/actions/{action}", post(handle))
            .with_state((Arc::clone(&seen), status, delay));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/v2", addr), seen)
    }

    #[tokio::test]
    async fn test_answer_success() {
        let (base, seen) = fake_provider(StatusCode::OK, Duration::ZERO).await;
        let control = TelnyxCallControl::new("KEY123", &base, DEFAULT_DISPATCH_TIMEOUT).unwrap();

        let ack = control.answer("v3:call-1").await.unwrap();
        assert_eq!(ack.status, 200);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "v3:call-1");
        assert_eq!(seen[0].1, "answer");
        assert_eq!(seen[0].2, serde_json::json!({}));
        assert_eq!(seen[0].3.as_deref(), Some("Bearer KEY123"));
    }

    #[tokio::test]
    async fn test_transfer_sends_destination() {
        let (base, seen) = fake_provider(StatusCode::OK, Duration::ZERO).await;
        let control = TelnyxCallControl::new("KEY123", &base, DEFAULT_DISPATCH_TIMEOUT).unwrap();

        let to = sip_destination("+16399746645", "sip.retellai.com");
        control.transfer("v3:call-1", &to).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].1, "transfer");
        assert_eq!(
            seen[0].2,
            serde_json::json!({"to": "sip:+16399746645@sip.retellai.com"})
        );
    }

    #[tokio::test]
    async fn test_non_2xx_is_provider_error() {
        let (base, seen) = fake_provider(StatusCode::UNPROCESSABLE_ENTITY, Duration::ZERO).await;
        let control = TelnyxCallControl::new("KEY123", &base, DEFAULT_DISPATCH_TIMEOUT).unwrap();

        let err = control.answer("v3:call-1").await.unwrap_err();
        assert_eq!(err.status, Some(422));
        assert!(err.body.contains("errors"));
        // Exactly one request, no internal retry.
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_provider_error() {
        let (base, _seen) = fake_provider(StatusCode::OK, Duration::from_secs(2)).await;
        let control =
            TelnyxCallControl::new("KEY123", &base, Duration::from_millis(100)).unwrap();

        let err = control.answer("v3:call-1").await.unwrap_err();
        assert_eq!(err.status, None);
        assert_eq!(err.body, "request timed out");
    }

    #[test]
    fn test_action_url_encodes_call_id() {
        let control = TelnyxCallControl::new("k", "https://api.telnyx.com/v2/", DEFAULT_DISPATCH_TIMEOUT)
            .unwrap();
        assert_eq!(
            control.action_url("v3:a/b", "answer").as_str(),
            "https://api.telnyx.com/v2/calls/v3:a%2Fb/actions/answer"
        );
    }

    #[test]
    fn test_invalid_api_key_rejected() {
        let err = TelnyxCallControl::new("bad\nkey", TELNYX_API_BASE, DEFAULT_DISPATCH_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, DispatchConfigError::InvalidApiKey(_)));
    }
}
