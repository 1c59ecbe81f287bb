//! Tool Executor
//!
//! The boundary to whatever actually runs tools. The bridge hands it
//! canonical invocations and turns whatever comes back into results.

use super::{Result, ToolError, ToolInvocation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Who asked for the tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Call the invoking AI session belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Request id for log correlation.
    pub correlation_id: String,
}

impl ExecutionContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            call_id: None,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn with_call(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// Outcome reported by an executor. `is_error` results are delivered to the
/// model like any other result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorOutput {
    pub payload: Value,
    #[serde(default)]
    pub is_error: bool,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
    ) -> Result<ExecutorOutput>;
}

/// Used when no executor URL is configured; every call fails with
/// [`ToolError::NotConfigured`].
pub struct UnconfiguredExecutor;

#[async_trait]
impl ToolExecutor for UnconfiguredExecutor {
    async fn execute(
        &self,
        _invocation: &ToolInvocation,
        _context: &ExecutionContext,
    ) -> Result<ExecutorOutput> {
        Err(ToolError::NotConfigured)
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    #[serde(flatten)]
    context: &'a ExecutionContext,
    invocation: &'a ToolInvocation,
}

/// Posts `{call_id, correlation_id, invocation}` to the internal executor
/// service.
///
/// A JSON body of the form `{payload, is_error}` is used as is; any other
/// JSON body becomes the payload.
pub struct HttpToolExecutor {
    client: reqwest::Client,
    url: url::Url,
    timeout: Duration,
}

impl HttpToolExecutor {
    pub fn new(url: url::Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(
        &self,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
    ) -> Result<ExecutorOutput> {
        debug!(
            tool = %invocation.tool_name,
            invocation_id = %invocation.invocation_id,
            correlation_id = %context.correlation_id,
            "forwarding tool invocation"
        );

        let response = self
            .client
            .post(self.url.clone())
            .json(&ExecuteRequest {
                context,
                invocation,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(invocation.tool_name.clone(), self.timeout.as_secs())
                } else {
                    ToolError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Rejected {
                tool: invocation.tool_name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        Ok(match serde_json::from_value::<ExecutorOutput>(body.clone()) {
            Ok(output) if body.get("payload").is_some() => output,
            _ => ExecutorOutput {
                payload: body,
                is_error: false,
            },
        })
    }
}
