//! Tool bridge
//!
//! Vendor tool-call message → canonical invocations → [`ToolExecutor`] →
//! canonical results → vendor result messages.
//!
//! Vendors redeliver tool calls. Results are remembered per
//! `(call_id, invocation_id)`: a duplicate waits for (or replays) the first
//! execution instead of running the tool again. Invocation ids are only
//! unique within a call, so requests without a call id are never replayed.

use super::{
    decode_invocations, ExecutionContext, ToolExecutor, ToolFormat, ToolInvocation, ToolResult,
};
use crate::server::metrics::STD_METRICS;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Results kept for duplicate replay.
pub const DEFAULT_RESULT_CACHE: usize = 1024;

type CacheKey = (String, String);

#[derive(Default)]
struct ResultCache {
    entries: HashMap<CacheKey, Arc<OnceCell<ToolResult>>>,
    order: VecDeque<CacheKey>,
}

/// Runs vendor tool calls through one executor.
pub struct ToolBridge {
    executor: Arc<dyn ToolExecutor>,
    cache: Mutex<ResultCache>,
    capacity: usize,
}

impl ToolBridge {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self::with_capacity(executor, DEFAULT_RESULT_CACHE)
    }

    pub fn with_capacity(executor: Arc<dyn ToolExecutor>, capacity: usize) -> Self {
        Self {
            executor,
            cache: Mutex::new(ResultCache::default()),
            capacity: capacity.max(1),
        }
    }

    /// Execute every tool call in `message` and return one vendor-formatted
    /// result per call, in order. Messages without tool calls yield nothing.
    pub async fn handle_message(
        &self,
        format: ToolFormat,
        message: &Value,
        context: &ExecutionContext,
    ) -> Vec<Value> {
        let adapter = format.adapter();
        let mut results = Vec::new();
        for invocation in decode_invocations(format, message) {
            let result = self.invoke(format, &invocation, context).await;
            results.push(adapter.result(&result));
        }
        results
    }

    /// Execute one canonical invocation, at most once per call and id.
    pub async fn invoke(
        &self,
        format: ToolFormat,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
    ) -> ToolResult {
        let Some(call_id) = context.call_id.as_deref().filter(|id| !id.is_empty()) else {
            return self.execute(format, invocation, context).await;
        };
        let cell = self.cell(call_id, &invocation.invocation_id);

        let mut executed = false;
        let result = cell
            .get_or_init(|| {
                executed = true;
                self.execute(format, invocation, context)
            })
            .await
            .clone();

        if !executed {
            STD_METRICS
                .tool_calls_total
                .inc(&[format.as_str(), "replayed"]);
            info!(
                tool = %invocation.tool_name,
                invocation_id = %invocation.invocation_id,
                correlation_id = %context.correlation_id,
                "duplicate tool call, replaying result"
            );
        }
        result
    }

    async fn execute(
        &self,
        format: ToolFormat,
        invocation: &ToolInvocation,
        context: &ExecutionContext,
    ) -> ToolResult {
        match self.executor.execute(invocation, context).await {
            Ok(output) => {
                let label = if output.is_error { "tool_error" } else { "ok" };
                STD_METRICS.tool_calls_total.inc(&[format.as_str(), label]);
                ToolResult {
                    invocation_id: invocation.invocation_id.clone(),
                    payload: output.payload,
                    is_error: output.is_error,
                }
            }
            Err(e) => {
                STD_METRICS.tool_calls_total.inc(&[format.as_str(), "error"]);
                warn!(
                    tool = %invocation.tool_name,
                    invocation_id = %invocation.invocation_id,
                    call_id = context.call_id.as_deref().unwrap_or(""),
                    correlation_id = %context.correlation_id,
                    error = %e,
                    "tool execution failed"
                );
                ToolResult::error(invocation.invocation_id.clone(), e.to_string())
            }
        }
    }

    fn cell(&self, call_id: &str, invocation_id: &str) -> Arc<OnceCell<ToolResult>> {
        let key = (call_id.to_string(), invocation_id.to_string());
        let mut cache = self.cache.lock();
        if let Some(cell) = cache.entries.get(&key) {
            return Arc::clone(cell);
        }

        while cache.order.len() >= self.capacity {
            if let Some(oldest) = cache.order.pop_front() {
                cache.entries.remove(&oldest);
            }
        }
        let cell = Arc::new(OnceCell::new());
        cache.entries.insert(key.clone(), Arc::clone(&cell));
        cache.order.push_back(key);
        cell
    }

    /// Number of remembered invocations.
    pub fn cached(&self) -> usize {
        self.cache.lock().entries.len()
    }
}
