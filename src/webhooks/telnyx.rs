//! Telnyx Ed25519 webhook verification
//!
//! The signed message is `"{telnyx-timestamp}|"` followed by the raw body.
//! Signature and public key are both base64.

use super::{RejectReason, Verdict, WebhookRequest, WebhookVerifier};
use crate::calls::Provider;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::time::Duration;

pub const SIGNATURE_HEADER: &str = "telnyx-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "telnyx-timestamp";

/// Maximum clock distance between the signed timestamp and now.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Ed25519 verifier for one public key.
#[derive(Debug, Clone)]
pub struct TelnyxEd25519Verifier {
    key: VerifyingKey,
    tolerance: Duration,
}

impl TelnyxEd25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self {
            key,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Parse a base64-encoded 32-byte public key.
    pub fn from_base64(public_key: &str) -> Result<Self, RejectReason> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(public_key.trim())
            .map_err(|_| RejectReason::MalformedKey)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| RejectReason::MalformedKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, RejectReason> {
        VerifyingKey::from_bytes(bytes)
            .map(Self::new)
            .map_err(|_| RejectReason::MalformedKey)
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn key_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    /// SHA-256 of the public key; what a call is pinned to.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(self.key.as_bytes()).into()
    }

    /// Verify against an explicit clock, in unix seconds.
    pub fn verify_at(&self, request: &WebhookRequest<'_>, now: i64) -> Verdict {
        let Some(signature) = request.header(SIGNATURE_HEADER) else {
            return Verdict::Rejected(RejectReason::MissingSignature);
        };
        let Some(timestamp) = request.header(TIMESTAMP_HEADER) else {
            return Verdict::Rejected(RejectReason::MissingTimestamp);
        };

        let Ok(signed_at) = timestamp.parse::<i64>() else {
            return Verdict::Rejected(RejectReason::MalformedTimestamp);
        };
        if now.abs_diff(signed_at) > self.tolerance.as_secs() {
            return Verdict::Rejected(RejectReason::StaleTimestamp);
        }

        let signature = match base64::engine::general_purpose::STANDARD
            .decode(signature)
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
        {
            Some(signature) => signature,
            None => return Verdict::Rejected(RejectReason::MalformedSignature),
        };

        let mut message = Vec::with_capacity(timestamp.len() + 1 + request.raw_body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.push(b'|');
        message.extend_from_slice(request.raw_body);

        match self.key.verify(&message, &signature) {
            Ok(()) => Verdict::Verified,
            Err(_) => Verdict::Rejected(RejectReason::Mismatch),
        }
    }
}

impl WebhookVerifier for TelnyxEd25519Verifier {
    fn provider(&self) -> Provider {
        Provider::Telnyx
    }

    fn verify(&self, request: &WebhookRequest<'_>) -> Verdict {
        self.verify_at(request, chrono::Utc::now().timestamp())
    }
}
