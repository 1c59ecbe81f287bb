//! Twilio `X-Twilio-Signature` verification
//!
//! signature = base64(HMAC-SHA1(auth_token, url ++ key1 ++ value1 ++ key2 ++ value2 ...))
//! with form parameters sorted by key.

use super::{RejectReason, Verdict, WebhookRequest, WebhookVerifier};
use crate::calls::Provider;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// HMAC-SHA1 verifier keyed by the account auth token.
pub struct TwilioHmacVerifier {
    auth_token: String,
}

impl TwilioHmacVerifier {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
        }
    }

    fn mac(&self, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
        let mut sorted: Vec<&(String, String)> = params.iter().collect();
        sorted.sort();

        let mut mac = HmacSha1::new_from_slice(self.auth_token.as_bytes()).ok()?;
        mac.update(url.as_bytes());
        for (key, value) in sorted {
            mac.update(key.as_bytes());
            mac.update(value.as_bytes());
        }
        Some(mac)
    }

    /// Base64 signature for `url` and `params`.
    pub fn sign(&self, url: &str, params: &[(String, String)]) -> String {
        self.mac(url, params)
            .map(|mac| base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    /// Constant-time check of `signature` against `url` and `params`.
    pub fn verify_params(&self, url: &str, params: &[(String, String)], signature: &str) -> Verdict {
        let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
            return Verdict::Rejected(RejectReason::MalformedSignature);
        };
        let Some(mac) = self.mac(url, params) else {
            return Verdict::Rejected(RejectReason::MissingCredentials);
        };
        match mac.verify_slice(&expected) {
            Ok(()) => Verdict::Verified,
            Err(_) => Verdict::Rejected(RejectReason::Mismatch),
        }
    }
}

/// Decode an `application/x-www-form-urlencoded` body in wire order.
pub fn parse_form(raw_body: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw_body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

impl WebhookVerifier for TwilioHmacVerifier {
    fn provider(&self) -> Provider {
        Provider::Twilio
    }

    fn verify(&self, request: &WebhookRequest<'_>) -> Verdict {
        if self.auth_token.is_empty() {
            return Verdict::Rejected(RejectReason::MissingCredentials);
        }
        let Some(signature) = request.header(SIGNATURE_HEADER) else {
            return Verdict::Rejected(RejectReason::MissingSignature);
        };
        let params = parse_form(request.raw_body);
        self.verify_params(request.url, &params, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    const URL: &str = "https://mycompany.com/myapp.php?foo=1&bar=2";

    fn params() -> Vec<(String, String)> {
        [
            ("CallSid", "CA1234567890ABCDE"),
            ("Caller", "+12349013030"),
            ("Digits", "1234"),
            ("From", "+12349013030"),
            ("To", "+18005551212"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_known_vector() {
        // Published Twilio example signature for the parameters above.
        let verifier = TwilioHmacVerifier::new("12345");
        assert_eq!(verifier.sign(URL, &params()), "0/KCTR6DLpKmkAf8muzZqo1nDgQ=");
    }

    #[test]
    fn test_valid_signature_passes() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        let signature = verifier.sign(URL, &params());
        assert_eq!(verifier.verify_params(URL, &params(), &signature), Verdict::Verified);
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        let signature = verifier.sign(URL, &params());
        let mut reversed = params();
        reversed.reverse();
        assert_eq!(verifier.verify_params(URL, &reversed, &signature), Verdict::Verified);
    }

    #[test]
    fn test_flipping_any_param_fails() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        let signature = verifier.sign(URL, &params());
        for i in 0..params().len() {
            let mut tampered = params();
            tampered[i].1.push('0');
            assert_eq!(
                verifier.verify_params(URL, &tampered, &signature),
                Verdict::Rejected(RejectReason::Mismatch),
                "param {} tampered",
                tampered[i].0
            );
        }
    }

    #[test]
    fn test_wrong_url_or_secret_fails() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        let signature = verifier.sign(URL, &params());
        assert!(!verifier
            .verify_params("https://mycompany.com/other", &params(), &signature)
            .is_verified());
        assert!(!TwilioHmacVerifier::new("other-token")
            .verify_params(URL, &params(), &signature)
            .is_verified());
    }

    #[test]
    fn test_request_verification() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        let body = b"To=%2B18005551212&CallSid=CA1&CallStatus=ringing";
        let form = parse_form(body);
        assert_eq!(form[0], ("To".to_string(), "+18005551212".to_string()));

        let mut headers = HeaderMap::new();
        let request = WebhookRequest {
            url: URL,
            headers: &headers,
            raw_body: body,
        };
        assert_eq!(
            verifier.verify(&request),
            Verdict::Rejected(RejectReason::MissingSignature)
        );

        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&verifier.sign(URL, &form)).unwrap(),
        );
        let request = WebhookRequest {
            url: URL,
            headers: &headers,
            raw_body: body,
        };
        assert_eq!(verifier.verify(&request), Verdict::Verified);
    }

    #[test]
    fn test_garbage_signature_is_malformed() {
        let verifier = TwilioHmacVerifier::new("secret-token");
        assert_eq!(
            verifier.verify_params(URL, &params(), "not base64!!"),
            Verdict::Rejected(RejectReason::MalformedSignature)
        );
    }
}
