//! Payment webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex>` where the hex value is
//! HMAC-SHA256 over `"{t}.{raw body}"`. Several `v1` entries may be present
//! during secret rotation; any one matching is enough.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Option<ParsedHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    Some(ParsedHeader {
        timestamp: timestamp?,
        signatures,
    })
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, AppError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| AppError::Internal("failed to initialize hmac".to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }

    /// Checks `header` against the raw request body. Never touches storage.
    pub fn verify(&self, payload: &[u8], header: Option<&str>, now: i64) -> Result<(), AppError> {
        let header = header
            .ok_or_else(|| AppError::AuthenticationFailed("missing signature header".to_string()))?;
        let parsed = parse_header(header)
            .ok_or_else(|| AppError::AuthenticationFailed("malformed signature header".to_string()))?;

        if now.abs_diff(parsed.timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(AppError::AuthenticationFailed(
                "signature timestamp outside tolerance".to_string(),
            ));
        }

        for signature in &parsed.signatures {
            if self.mac(parsed.timestamp, payload)?.verify_slice(signature).is_ok() {
                return Ok(());
            }
        }

        Err(AppError::AuthenticationFailed(
            "no matching signature".to_string(),
        ))
    }

    /// Builds a header value the way the provider does.
    pub fn signature_header(&self, payload: &[u8], timestamp: i64) -> Result<String, AppError> {
        let digest = self.mac(timestamp, payload)?.finalize().into_bytes();
        Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
    }
}

#[cfg(test)]
mod tests {
    use super::WebhookVerifier;
    use crate::error::AppError;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_its_own_signature() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let header = verifier.signature_header(BODY, 1_700_000_000).unwrap();
        assert!(verifier.verify(BODY, Some(&header), 1_700_000_010).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let header = verifier.signature_header(BODY, 1_700_000_000).unwrap();
        let tampered = br#"{"id":"evt_1","type":"checkout.session.expired"}"#;
        assert!(matches!(
            verifier.verify(tampered, Some(&header), 1_700_000_000),
            Err(AppError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn rejects_other_secret_and_stale_timestamp() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let foreign = WebhookVerifier::new("whsec_other", 300);
        let header = foreign.signature_header(BODY, 1_700_000_000).unwrap();
        assert!(verifier.verify(BODY, Some(&header), 1_700_000_000).is_err());

        let header = verifier.signature_header(BODY, 1_700_000_000).unwrap();
        assert!(verifier.verify(BODY, Some(&header), 1_700_000_301).is_err());
    }

    #[test]
    fn missing_or_garbled_header_fails_closed() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        assert!(verifier.verify(BODY, None, 0).is_err());
        assert!(verifier.verify(BODY, Some("garbage"), 0).is_err());
        assert!(verifier.verify(BODY, Some("v1=abcd"), 0).is_err());
        assert!(matches!(
            verifier.verify(BODY, Some("t=-9223372036854775808,v1=00"), 1_700_000_000),
            Err(AppError::AuthenticationFailed(_))
        ));
        assert!(verifier
            .verify(BODY, Some("t=9223372036854775807,v1=00"), i64::MIN)
            .is_err());
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let verifier = WebhookVerifier::new("whsec_test", 300);
        let good = verifier.signature_header(BODY, 1_700_000_000).unwrap();
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t=1700000000,v1={},v1={good_sig}", "00".repeat(32));
        assert!(verifier.verify(BODY, Some(&header), 1_700_000_000).is_ok());
    }
}
