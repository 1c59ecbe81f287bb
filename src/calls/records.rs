//! Call record sink
//!
//! Durable call metadata lives outside this service. The state machine only
//! writes create/update side effects through [`CallRecordSink`]; failures are
//! logged by the caller and never change the webhook response.

use super::{CallLegRole, CallState, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("record sink rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("record sink unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Call metadata written when a call is first seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: String,
    pub provider: Provider,
    pub from: String,
    pub to: String,
    /// Provider-reported direction (`incoming`, `outbound-api`, ...), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    pub leg_role: CallLegRole,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Fields changed on a state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordUpdate {
    pub state: CallState,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// External store of call metadata.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    async fn create(&self, record: CallRecord) -> Result<(), SinkError>;

    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<(), SinkError>;
}

/// Keeps records in process memory. Used when no external sink is configured
/// and by tests.
#[derive(Debug, Default)]
pub struct InMemoryCallRecords {
    records: RwLock<HashMap<String, CallRecord>>,
}

impl InMemoryCallRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.records.read().get(call_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CallRecordSink for InMemoryCallRecords {
    async fn create(&self, record: CallRecord) -> Result<(), SinkError> {
        // A redelivered create must not clobber a record that already moved on.
        self.records
            .write()
            .entry(record.call_id.clone())
            .or_insert(record);
        Ok(())
    }

    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<(), SinkError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(call_id)
            .ok_or_else(|| SinkError::NotFound(call_id.to_string()))?;
        record.state = update.state;
        record.updated_at = update.updated_at;
        if update.failure_reason.is_some() {
            record.failure_reason = update.failure_reason;
        }
        Ok(())
    }
}

/// Forwards records as JSON to an external HTTP service.
///
/// `POST {base}/calls` creates, `PATCH {base}/calls/{call_id}` updates.
#[derive(Debug, Clone)]
pub struct HttpCallRecordSink {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpCallRecordSink {
    pub fn new(base_url: url::Url, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn calls_url(&self, call_id: Option<&str>) -> url::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("calls");
            if let Some(id) = call_id {
                segments.push(id);
            }
        }
        url
    }

    async fn check(response: reqwest::Response) -> Result<(), SinkError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CallRecordSink for HttpCallRecordSink {
    async fn create(&self, record: CallRecord) -> Result<(), SinkError> {
        let response = self
            .client
            .post(self.calls_url(None))
            .json(&record)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<(), SinkError> {
        let response = self
            .client
            .patch(self.calls_url(Some(call_id)))
            .json(&update)
            .send()
            .await?;
        Self::check(response).await
    }
}
