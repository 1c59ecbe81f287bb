//! HTTP server
//!
//! Webhook intake, the tool bridge endpoints, health and metrics.
//!
//! Every response to a telephony provider is `200 {status}` once the request
//! is authenticated, whatever happened downstream. Only signature rejection
//! (403) and unknown routes (404) are answered otherwise.

pub mod metrics;

use crate::calls::{
    peek_telnyx_call_id, CallActionStore, CallEvent, CallEventStateMachine, CallRecordSink,
    HttpCallRecordSink, InMemoryCallRecords, InMemoryCallStore, KeyPin, Provider,
};
use crate::config::Config;
use crate::dispatch::{CallControl, DispatchConfigError, TelnyxCallControl};
use crate::tools::{
    convert_definitions, declarations_from_document, ExecutionContext, HttpToolExecutor, ToolBridge, ToolError, ToolExecutor,
    ToolFormat, UnconfiguredExecutor,
};
use crate::webhooks::{
    self, twilio::parse_form, Decision, RejectReason, SignaturePolicy, TelnyxEd25519Verifier,
    Verdict, WebhookRequest, WebhookVerifier,
};
use axum::body::Bytes;
use axum::extract::{OriginalUri, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use self::metrics::STD_METRICS;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Response header echoing the per-request correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// How often finished calls are swept from the action store.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("server error: {0}")]
    Serve(std::io::Error),

    #[error("invalid {0} URL: {1}")]
    InvalidUrl(&'static str, url::ParseError),

    #[error("dispatcher setup failed: {0}")]
    Dispatch(#[from] DispatchConfigError),

    #[error("record sink setup failed: {0}")]
    Records(#[from] crate::calls::SinkError),

    #[error("tool executor setup failed: {0}")]
    Tools(#[from] ToolError),
}

/// Verification material and policy for inbound webhooks.
#[derive(Debug, Clone, Default)]
pub struct WebhookSettings {
    pub policy: SignaturePolicy,
    pub telnyx_public_key: Option<String>,
    pub telnyx_endpoint_keys: BTreeMap<String, String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_base_url: Option<String>,
}

impl From<&Config> for WebhookSettings {
    fn from(config: &Config) -> Self {
        Self {
            policy: SignaturePolicy::new(
                config.security.is_production(),
                config.security.allow_unsigned_webhooks,
            ),
            telnyx_public_key: config.telnyx.public_key.clone(),
            telnyx_endpoint_keys: config.telnyx.endpoint_keys.clone(),
            twilio_auth_token: config.twilio.auth_token.clone(),
            twilio_base_url: config.twilio.webhook_base_url.clone(),
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<CallEventStateMachine>,
    pub bridge: Arc<ToolBridge>,
    pub webhooks: Arc<WebhookSettings>,
}

impl AppState {
    pub fn new(
        machine: CallEventStateMachine,
        bridge: ToolBridge,
        webhooks: WebhookSettings,
    ) -> Self {
        Self {
            machine: Arc::new(machine),
            bridge: Arc::new(bridge),
            webhooks: Arc::new(webhooks),
        }
    }

    /// Wire up the production collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let timeout = match config.telnyx.timeout_secs {
            0 => crate::dispatch::DEFAULT_DISPATCH_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        let control: Arc<dyn CallControl> = Arc::new(TelnyxCallControl::new(
            config.telnyx.api_key.as_deref().unwrap_or_default(),
            &config.telnyx.api_base_url,
            timeout,
        )?);

        let records: Arc<dyn CallRecordSink> = match &config.records.url {
            Some(raw) => {
                let url = url::Url::parse(raw).map_err(|e| ServerError::InvalidUrl("records", e))?;
                Arc::new(HttpCallRecordSink::new(
                    url,
                    Duration::from_secs(config.records.timeout_secs.max(1)),
                )?)
            }
            None => Arc::new(InMemoryCallRecords::new()),
        };

        let executor: Arc<dyn ToolExecutor> = match &config.tools.executor_url {
            Some(raw) => {
                let url = url::Url::parse(raw).map_err(|e| ServerError::InvalidUrl("tools", e))?;
                Arc::new(HttpToolExecutor::new(
                    url,
                    Duration::from_secs(config.tools.timeout_secs.max(1)),
                )?)
            }
            None => Arc::new(UnconfiguredExecutor),
        };

        let machine = CallEventStateMachine::new(
            Arc::new(
                InMemoryCallStore::new()
                    .with_idle_ttl(Duration::from_secs(config.server.call_idle_ttl_secs)),
            ),
            control,
            records,
            config.voice_vendor.sip_host.clone(),
        );

        Ok(Self::new(
            machine,
            ToolBridge::new(executor),
            WebhookSettings::from(config),
        ))
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/webhooks/{provider}/call", post(provider_webhook))
        .route(
            "/webhooks/telnyx/public/{endpoint}/call",
            post(telnyx_endpoint_webhook),
        )
        .route("/tools/{format}/call", post(tool_call))
        .route("/tools/{format}/definitions", post(tool_definitions))
        .with_state(state)
}

fn reply(status: StatusCode, body: Value, correlation_id: &str) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

fn status_reply(status: StatusCode, label: &str, correlation_id: &str) -> Response {
    reply(status, json!({ "status": label }), correlation_id)
}

fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /webhooks/{provider}/call`
async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = new_correlation_id();
    match Provider::from_tag(&provider) {
        Some(Provider::Telnyx) => {
            let key = state.webhooks.telnyx_public_key.clone();
            handle_telnyx(&state, key.as_deref(), &uri, &headers, &body, &correlation_id).await
        }
        Some(Provider::Twilio) => {
            handle_twilio(&state, &uri, &headers, &body, &correlation_id).await
        }
        None => {
            debug!(provider = %provider, correlation_id = %correlation_id, "unknown provider tag");
            status_reply(StatusCode::NOT_FOUND, "unknown_provider", &correlation_id)
        }
    }
}

/// `POST /webhooks/telnyx/public/{endpoint}/call`, verified with the
/// endpoint's own key instead of the default one.
async fn telnyx_endpoint_webhook(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = new_correlation_id();
    let Some(key) = state.webhooks.telnyx_endpoint_keys.get(&endpoint).cloned() else {
        debug!(endpoint = %endpoint, correlation_id = %correlation_id, "unknown webhook endpoint");
        return status_reply(StatusCode::NOT_FOUND, "unknown_endpoint", &correlation_id);
    };
    handle_telnyx(&state, Some(&key), &uri, &headers, &body, &correlation_id).await
}

async fn handle_telnyx(
    state: &AppState,
    public_key: Option<&str>,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    correlation_id: &str,
) -> Response {
    let call_id = peek_telnyx_call_id(body);
    let url = uri.to_string();
    let request = WebhookRequest {
        url: &url,
        headers,
        raw_body: body,
    };

    let verdict = verify_telnyx(state, public_key, call_id.as_deref(), &request).await;
    if let Some(rejected) = apply_policy(state, Provider::Telnyx, verdict, call_id.as_deref(), correlation_id) {
        return rejected;
    }

    let event = match CallEvent::from_telnyx(body) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                call_id = call_id.as_deref().unwrap_or(""),
                correlation_id,
                error = %e,
                "ignoring unparseable telnyx webhook"
            );
            STD_METRICS.webhooks_total.inc(&["telnyx", "ignored"]);
            return status_reply(StatusCode::OK, "ignored", correlation_id);
        }
    };

    dispatch_event(state, &event, correlation_id).await
}

/// Verify with the route key, then hold the call to the first key that
/// verified it.
async fn verify_telnyx(
    state: &AppState,
    public_key: Option<&str>,
    call_id: Option<&str>,
    request: &WebhookRequest<'_>,
) -> Verdict {
    let Some(material) = public_key.map(str::trim).filter(|k| !k.is_empty()) else {
        return Verdict::Rejected(RejectReason::MissingCredentials);
    };
    let verifier = match TelnyxEd25519Verifier::from_base64(material) {
        Ok(verifier) => verifier,
        Err(reason) => return Verdict::Rejected(reason),
    };

    let verdict = verifier.verify(request);
    if !verdict.is_verified() {
        return verdict;
    }

    if let Some(call_id) = call_id {
        let fingerprint = verifier.fingerprint();
        let store = state.machine.store();
        match store.pin_key(call_id, fingerprint).await {
            KeyPin::Pinned => {
                debug!(call_id, key = %hex::encode(&fingerprint[..8]), "pinned webhook key");
            }
            KeyPin::Matches => {}
            KeyPin::Conflict => return Verdict::Rejected(RejectReason::KeyPinMismatch),
        }
    }
    Verdict::Verified
}

async fn handle_twilio(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    correlation_id: &str,
) -> Response {
    let url = twilio_signed_url(state.webhooks.twilio_base_url.as_deref(), uri, headers);
    let request = WebhookRequest {
        url: &url,
        headers,
        raw_body: body,
    };
    let params = parse_form(body);
    let call_id = params
        .iter()
        .find(|(k, _)| k == "CallSid")
        .map(|(_, v)| v.as_str());

    let verdict = webhooks::verify(
        Provider::Twilio,
        &request,
        state.webhooks.twilio_auth_token.as_deref(),
    );
    if let Some(rejected) = apply_policy(state, Provider::Twilio, verdict, call_id, correlation_id) {
        return rejected;
    }

    let event = match CallEvent::from_twilio_form(&params) {
        Ok(event) => event,
        Err(e) => {
            warn!(correlation_id, error = %e, "ignoring twilio webhook without a call");
            STD_METRICS.webhooks_total.inc(&["twilio", "ignored"]);
            return status_reply(StatusCode::OK, "ignored", correlation_id);
        }
    };

    dispatch_event(state, &event, correlation_id).await
}

/// The URL Twilio signed: the configured public origin plus path and query,
/// or the `Host` header when no origin is configured.
fn twilio_signed_url(base_url: Option<&str>, uri: &Uri, headers: &HeaderMap) -> String {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    match base_url {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), path_and_query),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("localhost");
            format!("https://{}{}", host, path_and_query)
        }
    }
}

/// Turn a verdict into a rejection response, or `None` to continue.
fn apply_policy(
    state: &AppState,
    provider: Provider,
    verdict: Verdict,
    call_id: Option<&str>,
    correlation_id: &str,
) -> Option<Response> {
    match state.webhooks.policy.decide(verdict) {
        Decision::Accept => None,
        Decision::AcceptWithWarning(reason) => {
            warn!(
                provider = %provider,
                call_id = call_id.unwrap_or(""),
                correlation_id,
                reason = reason.as_str(),
                "accepting unverified webhook (non-production override)"
            );
            None
        }
        Decision::Reject(reason) => {
            warn!(
                provider = %provider,
                call_id = call_id.unwrap_or(""),
                correlation_id,
                reason = reason.as_str(),
                "webhook signature rejected"
            );
            STD_METRICS
                .signature_rejections_total
                .inc(&[provider.as_str(), reason.as_str()]);
            STD_METRICS
                .webhooks_total
                .inc(&[provider.as_str(), "rejected"]);
            Some(status_reply(StatusCode::FORBIDDEN, "rejected", correlation_id))
        }
    }
}

async fn dispatch_event(state: &AppState, event: &CallEvent, correlation_id: &str) -> Response {
    let outcome = state.machine.handle(event, correlation_id).await;
    STD_METRICS
        .webhooks_total
        .inc(&[event.provider.as_str(), outcome.as_str()]);
    info!(
        provider = %event.provider,
        call_id = %event.provider_call_id,
        correlation_id,
        event_type = event.event_type.as_str(),
        outcome = outcome.as_str(),
        "webhook handled"
    );
    status_reply(StatusCode::OK, outcome.as_str(), correlation_id)
}

/// Body of `POST /tools/{format}/call`.
#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    #[serde(default)]
    call_id: Option<String>,
    message: Value,
}

/// `POST /tools/{format}/call`
async fn tool_call(
    State(state): State<AppState>,
    Path(format): Path<String>,
    Json(request): Json<ToolCallRequest>,
) -> Response {
    let correlation_id = new_correlation_id();
    let Some(format) = ToolFormat::from_tag(&format) else {
        return status_reply(StatusCode::NOT_FOUND, "unknown_format", &correlation_id);
    };

    let mut context = ExecutionContext::new(correlation_id.clone());
    context.call_id = request.call_id;

    let results = state
        .bridge
        .handle_message(format, &request.message, &context)
        .await;
    reply(StatusCode::OK, json!({ "results": results }), &correlation_id)
}

/// `POST /tools/{format}/definitions`: accepts an array of declarations, a
/// `{tools: [...]}` wrapper or a single declaration.
async fn tool_definitions(Path(format): Path<String>, Json(body): Json<Value>) -> Response {
    let correlation_id = new_correlation_id();
    let Some(format) = ToolFormat::from_tag(&format) else {
        return status_reply(StatusCode::NOT_FOUND, "unknown_format", &correlation_id);
    };

    let tools = declarations_from_document(&body);
    reply(
        StatusCode::OK,
        Value::Array(convert_definitions(&tools, format)),
        &correlation_id,
    )
}

/// Sweep finished and abandoned calls out of the action store every
/// [`PRUNE_INTERVAL`].
pub fn spawn_pruner(
    store: Arc<dyn CallActionStore>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = store.prune(retention).await;
            STD_METRICS.calls_pruned_total.inc_by(removed as u64);
            STD_METRICS.calls_tracked.set(store.tracked().await as f64);
            if removed > 0 {
                debug!(removed, "pruned calls");
            }
        }
    })
}

/// Bind and serve until SIGINT/SIGTERM.
pub async fn serve(config: Config) -> Result<(), ServerError> {
    let state = AppState::from_config(&config)?;
    let pruner = spawn_pruner(
        Arc::clone(state.machine.store()),
        Duration::from_secs(config.server.call_retention_secs),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|e| ServerError::Bind(config.server.bind.clone(), e))?;
    info!(
        bind = %config.server.bind,
        sip_host = %config.voice_vendor.sip_host,
        production = config.security.is_production(),
        "switchboard listening"
    );

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve);

    pruner.abort();
    info!("switchboard shut down");
    result
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twilio_signed_url_prefers_configured_origin() {
        let uri: Uri = "/webhooks/twilio/call?tenant=7".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));

        assert_eq!(
            twilio_signed_url(Some("https://voice.example.com/"), &uri, &headers),
            "https://voice.example.com/webhooks/twilio/call?tenant=7"
        );
        assert_eq!(
            twilio_signed_url(None, &uri, &headers),
            "https://internal:8080/webhooks/twilio/call?tenant=7"
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.security.allow_unsigned_webhooks = true;
        assert_eq!(WebhookSettings::from(&config).policy, SignaturePolicy::Enforce);

        config.security.environment = crate::config::Environment::Development;
        assert_eq!(
            WebhookSettings::from(&config).policy,
            SignaturePolicy::AllowUnsigned
        );
    }

    #[tokio::test]
    async fn test_state_from_default_config() {
        let state = AppState::from_config(&Config::default()).unwrap();
        assert_eq!(state.machine.store().tracked().await, 0);
    }

    #[tokio::test]
    async fn test_state_rejects_bad_urls() {
        let mut config = Config::default();
        config.records.url = Some("not a url".to_string());
        assert!(matches!(
            AppState::from_config(&config),
            Err(ServerError::InvalidUrl("records", _))
        ));
    }
}
