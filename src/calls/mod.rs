//! Call domain types
//!
//! Provider-neutral view of telephony webhook events, the derived leg role
//! that decides whether an event may trigger call-control actions, and the
//! per-call lifecycle states the state machine moves through.

pub mod machine;
pub mod records;
pub mod store;

pub use machine::*;
pub use records::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// E.164: leading `+`, non-zero country digit, at most 15 digits total.
static E164: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\+[1-9][0-9]{1,14}$").expect("E.164 pattern is valid")
});

/// Errors produced while turning a webhook body into a [`CallEvent`].
#[derive(Error, Debug)]
pub enum EventParseError {
    #[error("malformed webhook body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("webhook body has no call identifier")]
    MissingCallId,
}

/// Telephony provider a webhook came from.
///
/// Selected from the explicit tag in the request path, never inferred from
/// the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Ed25519-signed JSON webhooks, Call Control v2 REST actions.
    Telnyx,
    /// HMAC-SHA1-signed form webhooks, provider-answered calls.
    Twilio,
}

impl Provider {
    /// Parse the provider tag used in webhook routes.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "telnyx" => Some(Provider::Telnyx),
            "twilio" => Some(Provider::Twilio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Telnyx => "telnyx",
            Provider::Twilio => "twilio",
        }
    }

    /// Whether this provider expects us to answer and transfer calls through
    /// its REST API.
    pub fn has_call_control(&self) -> bool {
        matches!(self, Provider::Telnyx)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of call event carried by a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Initiated,
    Answered,
    Hangup,
    TransferCompleted,
    TransferFailed,
    /// Anything we do not recognise. Acknowledged and otherwise ignored.
    Unknown,
}

impl EventType {
    /// Map a Telnyx `data.event_type` value.
    pub fn from_telnyx(value: &str) -> Self {
        match value {
            "call.initiated" => EventType::Initiated,
            "call.answered" => EventType::Answered,
            "call.hangup" => EventType::Hangup,
            "call.transfer.completed" => EventType::TransferCompleted,
            "call.transfer.failed" => EventType::TransferFailed,
            _ => EventType::Unknown,
        }
    }

    /// Map a Twilio `CallStatus` value.
    pub fn from_twilio_status(status: &str) -> Self {
        match status {
            "queued" | "initiated" | "ringing" => EventType::Initiated,
            "in-progress" | "answered" => EventType::Answered,
            "completed" | "busy" | "failed" | "no-answer" | "canceled" => EventType::Hangup,
            _ => EventType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Initiated => "initiated",
            EventType::Answered => "answered",
            EventType::Hangup => "hangup",
            EventType::TransferCompleted => "transfer_completed",
            EventType::TransferFailed => "transfer_failed",
            EventType::Unknown => "unknown",
        }
    }
}

/// Which side of a physical call a webhook describes.
///
/// A call handed to the voice vendor shows up as two provider legs: the
/// caller's inbound leg (dialled to one of our E.164 numbers) and the SIP leg
/// created by the transfer. Only the inbound leg may be answered or
/// transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallLegRole {
    Inbound,
    Transfer,
}

impl CallLegRole {
    /// Classify a leg from its destination.
    ///
    /// Anything that is not a dialable E.164 number (SIP URIs included) is
    /// treated as the transfer leg and never triggers actions.
    pub fn from_destination(to_number: &str) -> Self {
        if is_e164(to_number) {
            CallLegRole::Inbound
        } else {
            CallLegRole::Transfer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallLegRole::Inbound => "inbound",
            CallLegRole::Transfer => "transfer",
        }
    }
}

/// Returns true for `+<country><subscriber>` numbers.
pub fn is_e164(number: &str) -> bool {
    E164.is_match(number.trim())
}

/// Returns true for `sip:` / `sips:` URIs.
pub fn is_sip_uri(destination: &str) -> bool {
    let lower = destination.trim().to_ascii_lowercase();
    lower.starts_with("sip:") || lower.starts_with("sips:")
}

/// Lifecycle of a call as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    ReceivedInitiated,
    Answering,
    Answered,
    Transferring,
    Transferred,
    TransferFailed,
    Ended,
}

impl CallState {
    /// Position in the lifecycle. States never move to a lower rank except
    /// through an explicit compare-and-set rollback after a failed action.
    pub fn rank(&self) -> u8 {
        match self {
            CallState::ReceivedInitiated => 0,
            CallState::Answering => 1,
            CallState::Answered => 2,
            CallState::Transferring => 3,
            CallState::Transferred | CallState::TransferFailed => 4,
            CallState::Ended => 5,
        }
    }

    /// No further Answer/Transfer is issued from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::TransferFailed)
    }

    /// Resulting state when `proposed` is applied on top of `current`.
    pub fn merge(current: Option<CallState>, proposed: CallState) -> CallState {
        match current {
            None => proposed,
            Some(current) if proposed.rank() > current.rank() => proposed,
            Some(current) => current,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::ReceivedInitiated => "RECEIVED_INITIATED",
            CallState::Answering => "ANSWERING",
            CallState::Answered => "ANSWERED",
            CallState::Transferring => "TRANSFERRING",
            CallState::Transferred => "TRANSFERRED",
            CallState::TransferFailed => "TRANSFER_FAILED",
            CallState::Ended => "ENDED",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single verified webhook notification about one call leg.
///
/// Identified by `(provider_call_id, event_type)`; redeliveries of the same
/// event are expected and must be harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub provider: Provider,
    /// Provider call-control id (Telnyx) or call SID (Twilio).
    pub provider_call_id: String,
    pub leg_id: Option<String>,
    pub event_type: EventType,
    pub from_number: String,
    pub to_number: String,
    /// The provider's event payload, untouched.
    pub raw_payload: Value,
}

impl CallEvent {
    pub fn leg_role(&self) -> CallLegRole {
        CallLegRole::from_destination(&self.to_number)
    }

    /// Direction as reported by the provider.
    pub fn direction(&self) -> Option<String> {
        ["direction", "Direction"]
            .iter()
            .find_map(|key| self.raw_payload.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    }

    /// Human-readable reason attached to failure or hangup events, if any.
    pub fn failure_reason(&self) -> Option<String> {
        ["failure_reason", "reason", "hangup_cause", "SipResponseCode"]
            .iter()
            .find_map(|key| match self.raw_payload.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Parse a Telnyx Call Control webhook body.
    ///
    /// Expected shape: `{data:{event_type, payload:{call_control_id, call_leg_id, from, to, ...}}, meta}`.
    pub fn from_telnyx(raw_body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: TelnyxEnvelope = serde_json::from_slice(raw_body)?;
        let payload = envelope.data.payload;

        let provider_call_id = payload
            .get("call_control_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(EventParseError::MissingCallId)?
            .to_string();

        Ok(Self {
            provider: Provider::Telnyx,
            provider_call_id,
            leg_id: string_field(&payload, "call_leg_id"),
            event_type: EventType::from_telnyx(&envelope.data.event_type),
            from_number: string_field(&payload, "from").unwrap_or_default(),
            to_number: string_field(&payload, "to").unwrap_or_default(),
            raw_payload: payload,
        })
    }

    /// Build an event from decoded Twilio status-callback form parameters.
    pub fn from_twilio_form(params: &[(String, String)]) -> Result<Self, EventParseError> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let provider_call_id = get("CallSid")
            .filter(|sid| !sid.is_empty())
            .ok_or(EventParseError::MissingCallId)?;

        let raw_payload = Value::Object(
            params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        );

        Ok(Self {
            provider: Provider::Twilio,
            provider_call_id,
            leg_id: get("ParentCallSid"),
            event_type: get("CallStatus")
                .map(|s| EventType::from_twilio_status(&s))
                .unwrap_or(EventType::Unknown),
            from_number: get("From").unwrap_or_default(),
            to_number: get("To").unwrap_or_default(),
            raw_payload,
        })
    }
}

/// Read the call-control id out of a Telnyx body without building an event.
///
/// Used to look up a pinned verification key before the body is trusted, so
/// it must tolerate any input.
pub fn peek_telnyx_call_id(raw_body: &[u8]) -> Option<String> {
    let envelope: TelnyxEnvelope = serde_json::from_slice(raw_body).ok()?;
    string_field(&envelope.data.payload, "call_control_id").filter(|id| !id.is_empty())
}

#[derive(Debug, Deserialize)]
struct TelnyxEnvelope {
    data: TelnyxData,
}

#[derive(Debug, Deserialize)]
struct TelnyxData {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    payload: Value,
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
