//! Webhook signature verification.
//!
//! Each source brings its own base string, but both run the same
//! HMAC-SHA-256 + constant-time-compare core. A verifier's only outcome
//! is pass or an error; parsing never starts on an unverified request.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::errors::{DomainError, DomainResult};

type HmacSha256 = Hmac<Sha256>;

/// Replay window for chat requests, in seconds.
pub const REPLAY_WINDOW_SECS: i64 = 300;

/// Byte-for-byte comparison whose timing is independent of where the
/// first mismatch sits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hmac_hex(secret: &str, base: &[u8]) -> DomainResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DomainError::SignatureRejected("invalid signing secret".to_string()))?;
    mac.update(base);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Slack-style verifier: base string `v0:{timestamp}:{body}`, signature
/// header `v0=<hex>`, bounded by the replay window.
#[derive(Debug, Clone)]
pub struct SlackVerifier {
    signing_secret: String,
}

impl SlackVerifier {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
        }
    }

    /// Compute the signature header value for a request. Used by tests
    /// and by nothing else; the verifier never signs outbound traffic.
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> DomainResult<String> {
        let mut base = format!("v0:{timestamp}:").into_bytes();
        base.extend_from_slice(body);
        Ok(format!("v0={}", hmac_hex(&self.signing_secret, &base)?))
    }

    pub fn verify(
        &self,
        timestamp_header: Option<&str>,
        signature_header: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> DomainResult<()> {
        if self.signing_secret.is_empty() {
            return Err(DomainError::NotConfigured("chat.signing_secret"));
        }
        let timestamp: i64 = timestamp_header
            .ok_or_else(|| DomainError::SignatureRejected("missing timestamp header".to_string()))?
            .parse()
            .map_err(|_| DomainError::SignatureRejected("malformed timestamp".to_string()))?;
        let signature = signature_header
            .ok_or_else(|| DomainError::SignatureRejected("missing signature header".to_string()))?;

        if (now - timestamp).abs() > REPLAY_WINDOW_SECS {
            return Err(DomainError::SignatureRejected(
                "replay attack protection: timestamp outside window".to_string(),
            ));
        }

        let expected = self.sign(timestamp, body)?;
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(DomainError::SignatureRejected(
                "signature mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// GitHub-style verifier: base string is the raw body, signature header
/// `sha256=<hex>`.
#[derive(Debug, Clone)]
pub struct GitHubVerifier {
    webhook_secret: String,
}

impl GitHubVerifier {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn sign(&self, body: &[u8]) -> DomainResult<String> {
        Ok(format!("sha256={}", hmac_hex(&self.webhook_secret, body)?))
    }

    pub fn verify(&self, signature_header: Option<&str>, body: &[u8]) -> DomainResult<()> {
        if self.webhook_secret.is_empty() {
            return Err(DomainError::NotConfigured("source_control.webhook_secret"));
        }
        let signature = signature_header
            .ok_or_else(|| DomainError::SignatureRejected("missing signature header".to_string()))?;

        let expected = self.sign(body)?;
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(DomainError::SignatureRejected(
                "signature mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = br#"{"type":"event_callback"}"#;

    #[test]
    fn slack_sign_then_verify_passes() {
        let verifier = SlackVerifier::new(SECRET);
        let now = 1_700_000_000;
        let sig = verifier.sign(now, BODY).unwrap();
        verifier
            .verify(Some(&now.to_string()), Some(&sig), BODY, now)
            .unwrap();
    }

    #[test]
    fn slack_single_byte_body_mutation_fails() {
        let verifier = SlackVerifier::new(SECRET);
        let now = 1_700_000_000;
        let sig = verifier.sign(now, BODY).unwrap();

        let mut mutated = BODY.to_vec();
        mutated[0] ^= 1;
        assert!(verifier
            .verify(Some(&now.to_string()), Some(&sig), &mutated, now)
            .is_err());
    }

    #[test]
    fn slack_signature_mutation_fails() {
        let verifier = SlackVerifier::new(SECRET);
        let now = 1_700_000_000;
        let mut sig = verifier.sign(now, BODY).unwrap();
        sig.replace_range(3..4, if &sig[3..4] == "0" { "1" } else { "0" });
        assert!(verifier
            .verify(Some(&now.to_string()), Some(&sig), BODY, now)
            .is_err());
    }

    #[test]
    fn slack_timestamp_mutation_fails() {
        let verifier = SlackVerifier::new(SECRET);
        let now = 1_700_000_000;
        let sig = verifier.sign(now, BODY).unwrap();
        assert!(verifier
            .verify(Some(&(now + 1).to_string()), Some(&sig), BODY, now)
            .is_err());
    }

    #[test]
    fn replay_window_edges() {
        let verifier = SlackVerifier::new(SECRET);
        let ts = 1_700_000_000;
        let sig = verifier.sign(ts, BODY).unwrap();

        // Exactly at the edge passes; one past it is a replay.
        verifier
            .verify(Some(&ts.to_string()), Some(&sig), BODY, ts + REPLAY_WINDOW_SECS)
            .unwrap();
        let err = verifier
            .verify(Some(&ts.to_string()), Some(&sig), BODY, ts + REPLAY_WINDOW_SECS + 1)
            .unwrap_err();
        assert!(err.to_string().contains("replay attack protection"));
    }

    #[test]
    fn missing_headers_fail() {
        let verifier = SlackVerifier::new(SECRET);
        assert!(verifier.verify(None, Some("v0=x"), BODY, 0).is_err());
        assert!(verifier.verify(Some("0"), None, BODY, 0).is_err());
    }

    #[test]
    fn unconfigured_secret_fails() {
        let verifier = SlackVerifier::new("");
        assert!(verifier.verify(Some("0"), Some("v0=x"), BODY, 0).is_err());

        let gh = GitHubVerifier::new("");
        assert!(gh.verify(Some("sha256=x"), BODY).is_err());
    }

    #[test]
    fn github_sign_then_verify_round_trips() {
        let verifier = GitHubVerifier::new(SECRET);
        let sig = verifier.sign(BODY).unwrap();
        verifier.verify(Some(&sig), BODY).unwrap();

        let mut mutated = BODY.to_vec();
        mutated[1] ^= 1;
        assert!(verifier.verify(Some(&sig), &mutated).is_err());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
