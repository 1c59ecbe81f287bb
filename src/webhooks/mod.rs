//! Webhook signature verification
//!
//! One verifier per provider, selected by the explicit provider tag carried
//! with the request. Verification always runs on the exact bytes received;
//! bodies are never re-serialized first.

pub mod telnyx;
pub mod twilio;

pub use telnyx::TelnyxEd25519Verifier;
pub use twilio::TwilioHmacVerifier;

use crate::calls::Provider;
use axum::http::HeaderMap;
use thiserror::Error;

/// Why a webhook was not authenticated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("signature header missing")]
    MissingSignature,

    #[error("timestamp header missing")]
    MissingTimestamp,

    #[error("no verification secret or key configured")]
    MissingCredentials,

    #[error("signature is not valid base64 or has the wrong length")]
    MalformedSignature,

    #[error("configured key is not a valid public key")]
    MalformedKey,

    #[error("timestamp is not a unix epoch value")]
    MalformedTimestamp,

    #[error("timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("signature does not match")]
    Mismatch,

    #[error("call was verified earlier with a different key")]
    KeyPinMismatch,
}

impl RejectReason {
    /// Short label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingSignature => "missing_signature",
            RejectReason::MissingTimestamp => "missing_timestamp",
            RejectReason::MissingCredentials => "missing_credentials",
            RejectReason::MalformedSignature => "malformed_signature",
            RejectReason::MalformedKey => "malformed_key",
            RejectReason::MalformedTimestamp => "malformed_timestamp",
            RejectReason::StaleTimestamp => "stale_timestamp",
            RejectReason::Mismatch => "mismatch",
            RejectReason::KeyPinMismatch => "key_pin_mismatch",
        }
    }
}

/// Result of verifying one webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }
}

/// Everything a verifier may look at.
#[derive(Debug, Clone, Copy)]
pub struct WebhookRequest<'a> {
    /// Full public URL the provider posted to (scheme, host, path and query).
    pub url: &'a str,
    pub headers: &'a HeaderMap,
    /// Body bytes exactly as received.
    pub raw_body: &'a [u8],
}

impl<'a> WebhookRequest<'a> {
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Provider-specific signature check.
pub trait WebhookVerifier: Send + Sync {
    fn provider(&self) -> Provider;

    fn verify(&self, request: &WebhookRequest<'_>) -> Verdict;
}

/// Verify `request` for `provider` with the given secret (Twilio auth token)
/// or base64 public key (Telnyx). Missing material rejects.
pub fn verify(
    provider: Provider,
    request: &WebhookRequest<'_>,
    secret_material: Option<&str>,
) -> Verdict {
    let Some(material) = secret_material.map(str::trim).filter(|m| !m.is_empty()) else {
        return Verdict::Rejected(RejectReason::MissingCredentials);
    };

    match provider {
        Provider::Twilio => TwilioHmacVerifier::new(material).verify(request),
        Provider::Telnyx => match TelnyxEd25519Verifier::from_base64(material) {
            Ok(verifier) => verifier.verify(request),
            Err(reason) => Verdict::Rejected(reason),
        },
    }
}

/// What to do with a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Unauthenticated but allowed by the non-production override.
    AcceptWithWarning(RejectReason),
    Reject(RejectReason),
}

/// Fail-closed unless explicitly relaxed outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignaturePolicy {
    #[default]
    Enforce,
    AllowUnsigned,
}

impl SignaturePolicy {
    /// The override needs both a non-production environment and the explicit
    /// flag. Nothing else relaxes it.
    pub fn new(production: bool, allow_unsigned: bool) -> Self {
        if !production && allow_unsigned {
            SignaturePolicy::AllowUnsigned
        } else {
            SignaturePolicy::Enforce
        }
    }

    pub fn decide(&self, verdict: Verdict) -> Decision {
        match (verdict, self) {
            (Verdict::Verified, _) => Decision::Accept,
            (Verdict::Rejected(reason), SignaturePolicy::AllowUnsigned) => {
                Decision::AcceptWithWarning(reason)
            }
            (Verdict::Rejected(reason), SignaturePolicy::Enforce) => Decision::Reject(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_material_rejects() {
        let headers = HeaderMap::new();
        let request = WebhookRequest {
            url: "https://example.com/webhooks/twilio/call",
            headers: &headers,
            raw_body: b"",
        };
        assert_eq!(
            verify(Provider::Twilio, &request, None),
            Verdict::Rejected(RejectReason::MissingCredentials)
        );
        assert_eq!(
            verify(Provider::Telnyx, &request, Some("  ")),
            Verdict::Rejected(RejectReason::MissingCredentials)
        );
    }

    #[test]
    fn test_policy_requires_both_conditions() {
        assert_eq!(SignaturePolicy::new(true, true), SignaturePolicy::Enforce);
        assert_eq!(SignaturePolicy::new(false, false), SignaturePolicy::Enforce);
        assert_eq!(SignaturePolicy::new(false, true), SignaturePolicy::AllowUnsigned);
    }

    #[test]
    fn test_policy_decisions() {
        let rejected = Verdict::Rejected(RejectReason::MissingSignature);
        assert_eq!(
            SignaturePolicy::Enforce.decide(rejected),
            Decision::Reject(RejectReason::MissingSignature)
        );
        assert_eq!(
            SignaturePolicy::AllowUnsigned.decide(rejected),
            Decision::AcceptWithWarning(RejectReason::MissingSignature)
        );
        assert_eq!(
            SignaturePolicy::Enforce.decide(Verdict::Verified),
            Decision::Accept
        );
    }
}
