//! Call event state machine
//!
//! Consumes verified call events, decides which call-control action (if any)
//! to issue, and keeps per-call state in the injected [`CallActionStore`].
//!
//! | event              | leg role | action                          | next state      |
//! |--------------------|----------|---------------------------------|-----------------|
//! | initiated          | inbound  | Answer                          | ANSWERING       |
//! | answered           | inbound  | Transfer to `sip:{to}@{host}`   | TRANSFERRING    |
//! | hangup             | either   | -                               | ENDED           |
//! | transfer_completed | -        | -                               | TRANSFERRED     |
//! | transfer_failed    | -        | -                               | TRANSFER_FAILED |
//! | anything else      | -        | ack only                        | unchanged       |
//!
//! Outbound failures are logged and the claim released; the provider's own
//! redelivery is the only retry.

use super::{
    CallAction, CallActionStore, CallEvent, CallLegRole, CallRecord, CallRecordSink,
    CallRecordUpdate, CallState, Claim, EventType, Transition,
};
use crate::dispatch::{sip_destination, CallControl};
use crate::server::metrics::STD_METRICS;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the handler did with an event. Reported back to the provider as
/// `{"status": ...}` with HTTP 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answering,
    Transferring,
    Transferred,
    TransferFailed,
    Ended,
    /// Event accepted, no action required.
    Acknowledged,
    /// The action was already issued (or is being issued) for this leg.
    Duplicate,
    /// The call already reached a terminal state; nothing issued.
    AlreadyTerminal,
    /// The Answer request failed; a redelivery may retry it.
    AnswerFailed,
    /// The Transfer request failed; a redelivery may retry it.
    TransferRequestFailed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Answering => "answering",
            Outcome::Transferring => "transferring",
            Outcome::Transferred => "transferred",
            Outcome::TransferFailed => "transfer_failed",
            Outcome::Ended => "ended",
            Outcome::Acknowledged => "acknowledged",
            Outcome::Duplicate => "duplicate",
            Outcome::AlreadyTerminal => "already_terminal",
            Outcome::AnswerFailed => "answer_failed",
            Outcome::TransferRequestFailed => "transfer_request_failed",
        }
    }
}

/// Drives per-call lifecycle and idempotent call-control actions.
pub struct CallEventStateMachine {
    store: Arc<dyn CallActionStore>,
    control: Arc<dyn CallControl>,
    records: Arc<dyn CallRecordSink>,
    sip_host: String,
}

impl CallEventStateMachine {
    pub fn new(
        store: Arc<dyn CallActionStore>,
        control: Arc<dyn CallControl>,
        records: Arc<dyn CallRecordSink>,
        sip_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            control,
            records,
            sip_host: sip_host.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallActionStore> {
        &self.store
    }

    /// Apply one event. Never fails: every error is logged and folded into
    /// the returned [`Outcome`].
    pub async fn handle(&self, event: &CallEvent, correlation_id: &str) -> Outcome {
        let role = event.leg_role();
        let call_id = event.provider_call_id.as_str();
        debug!(
            call_id,
            correlation_id,
            provider = %event.provider,
            event_type = event.event_type.as_str(),
            leg_role = role.as_str(),
            "handling call event"
        );

        match (event.event_type, role) {
            (EventType::Initiated, CallLegRole::Inbound) if event.provider.has_call_control() => {
                self.on_inbound_initiated(event, correlation_id).await
            }
            (EventType::Answered, CallLegRole::Inbound) if event.provider.has_call_control() => {
                self.on_inbound_answered(event, correlation_id).await
            }
            (EventType::Initiated, _) => {
                let transition = self.store.advance(call_id, CallState::ReceivedInitiated).await;
                self.record(event, transition, None, correlation_id).await;
                Outcome::Acknowledged
            }
            (EventType::Answered, _) => {
                let transition = self.store.advance(call_id, CallState::Answered).await;
                self.record(event, transition, None, correlation_id).await;
                Outcome::Acknowledged
            }
            (EventType::Hangup, _) => {
                let transition = self.store.advance(call_id, CallState::Ended).await;
                info!(call_id, correlation_id, "call ended");
                self.record(event, transition, event.failure_reason(), correlation_id)
                    .await;
                Outcome::Ended
            }
            (EventType::TransferCompleted, _) => {
                let transition = self.store.advance(call_id, CallState::Transferred).await;
                info!(call_id, correlation_id, "transfer completed");
                self.record(event, transition, None, correlation_id).await;
                Outcome::Transferred
            }
            (EventType::TransferFailed, _) => {
                let transition = self.store.advance(call_id, CallState::TransferFailed).await;
                let reason = event.failure_reason();
                warn!(
                    call_id,
                    correlation_id,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "transfer failed; not retrying"
                );
                self.record(event, transition, reason, correlation_id).await;
                Outcome::TransferFailed
            }
            (EventType::Unknown, _) => {
                debug!(call_id, correlation_id, "unrecognised event acknowledged");
                Outcome::Acknowledged
            }
        }
    }

    async fn on_inbound_initiated(&self, event: &CallEvent, correlation_id: &str) -> Outcome {
        let call_id = event.provider_call_id.as_str();

        let transition = self.store.advance(call_id, CallState::ReceivedInitiated).await;
        if transition.current.rank() > CallState::ReceivedInitiated.rank() {
            // Already answering or beyond; a late initiated changes nothing.
            return if transition.current.is_terminal() {
                Outcome::AlreadyTerminal
            } else {
                Outcome::Duplicate
            };
        }

        match self
            .store
            .try_claim(call_id, CallLegRole::Inbound, CallAction::Answer)
            .await
        {
            Claim::Granted => {}
            Claim::InFlight | Claim::Completed => {
                debug!(call_id, correlation_id, "answer already issued");
                return Outcome::Duplicate;
            }
        }

        let answering = self.store.advance(call_id, CallState::Answering).await;

        match self.control.answer(call_id).await {
            Ok(ack) => {
                self.store
                    .complete(call_id, CallLegRole::Inbound, CallAction::Answer)
                    .await;
                STD_METRICS.dispatch_total.inc(&["answer", "ok"]);
                info!(call_id, correlation_id, status = ack.status, "call answered");
                self.record(event, merge(transition, answering), None, correlation_id)
                    .await;
                Outcome::Answering
            }
            Err(err) => {
                self.store
                    .release(call_id, CallLegRole::Inbound, CallAction::Answer)
                    .await;
                self.store
                    .compare_and_set(call_id, CallState::Answering, CallState::ReceivedInitiated)
                    .await;
                STD_METRICS.dispatch_total.inc(&["answer", "error"]);
                warn!(
                    call_id,
                    correlation_id,
                    status = ?err.status,
                    error = %err.body,
                    "answer request failed"
                );
                self.record(event, transition, Some(err.to_string()), correlation_id)
                    .await;
                Outcome::AnswerFailed
            }
        }
    }

    async fn on_inbound_answered(&self, event: &CallEvent, correlation_id: &str) -> Outcome {
        let call_id = event.provider_call_id.as_str();

        let current = self.store.state(call_id).await;
        if current.is_some_and(|s| s.is_terminal()) {
            debug!(call_id, correlation_id, "answered event for finished call ignored");
            return Outcome::AlreadyTerminal;
        }

        let answered = self.store.advance(call_id, CallState::Answered).await;
        if answered.current.rank() > CallState::Answered.rank() {
            return if answered.current.is_terminal() {
                Outcome::AlreadyTerminal
            } else {
                Outcome::Duplicate
            };
        }

        match self
            .store
            .try_claim(call_id, CallLegRole::Inbound, CallAction::Transfer)
            .await
        {
            Claim::Granted => {}
            Claim::InFlight | Claim::Completed => {
                debug!(call_id, correlation_id, "transfer already issued");
                return Outcome::Duplicate;
            }
        }

        let transferring = self.store.advance(call_id, CallState::Transferring).await;
        let destination = sip_destination(&event.to_number, &self.sip_host);

        match self.control.transfer(call_id, &destination).await {
            Ok(ack) => {
                self.store
                    .complete(call_id, CallLegRole::Inbound, CallAction::Transfer)
                    .await;
                STD_METRICS.dispatch_total.inc(&["transfer", "ok"]);
                info!(
                    call_id,
                    correlation_id,
                    destination = %destination,
                    status = ack.status,
                    "call transfer requested"
                );
                self.record(event, merge(answered, transferring), None, correlation_id)
                    .await;
                Outcome::Transferring
            }
            Err(err) => {
                self.store
                    .release(call_id, CallLegRole::Inbound, CallAction::Transfer)
                    .await;
                self.store
                    .compare_and_set(call_id, CallState::Transferring, CallState::Answered)
                    .await;
                STD_METRICS.dispatch_total.inc(&["transfer", "error"]);
                warn!(
                    call_id,
                    correlation_id,
                    destination = %destination,
                    status = ?err.status,
                    error = %err.body,
                    "transfer request failed"
                );
                self.record(event, answered, Some(err.to_string()), correlation_id)
                    .await;
                Outcome::TransferRequestFailed
            }
        }
    }

    /// Write the record side effect for a transition. Sink failures are
    /// logged only.
    async fn record(
        &self,
        event: &CallEvent,
        transition: Transition,
        failure_reason: Option<String>,
        correlation_id: &str,
    ) {
        let call_id = event.provider_call_id.as_str();
        let now = Utc::now();

        let result = if transition.previous.is_none() {
            self.records
                .create(CallRecord {
                    call_id: call_id.to_string(),
                    provider: event.provider,
                    from: event.from_number.clone(),
                    to: event.to_number.clone(),
                    direction: event.direction(),
                    leg_role: event.leg_role(),
                    state: transition.current,
                    created_at: now,
                    updated_at: now,
                    failure_reason,
                })
                .await
        } else if transition.changed() || failure_reason.is_some() {
            self.records
                .update(
                    call_id,
                    CallRecordUpdate {
                        state: transition.current,
                        updated_at: now,
                        failure_reason,
                    },
                )
                .await
        } else {
            Ok(())
        };

        if let Err(err) = result {
            warn!(call_id, correlation_id, error = %err, "call record write failed");
        }
    }
}

/// Collapse two consecutive transitions into one spanning both.
fn merge(first: Transition, second: Transition) -> Transition {
    Transition {
        previous: first.previous,
        current: second.current,
    }
}
