use async_trait::async_trait;

use super::{parse_body, Normalized, WebhookVerifier};
use crate::error::L402Error;
use crate::hmac::compute_hmac;
use crate::payment::{Rail, SettlementEvent};
use crate::security::constant_time_eq;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
/// Maximum age of a signed timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const COMPLETION_EVENT: &str = "checkout.session.completed";

/// Stripe webhook signatures: `t=<unix>,v1=<hex hmac of "{t}.{body}">`.
pub struct StripeWebhook {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl StripeWebhook {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    pub fn verify_at(&self, header: &str, body: &[u8], now: i64) -> Result<(), L402Error> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
                Some(("v1", sig)) => candidates.push(sig),
                _ => {}
            }
        }

        let t = timestamp
            .ok_or_else(|| L402Error::WebhookAuth("signature header has no timestamp".to_string()))?;
        if (now - t).abs() > self.tolerance_secs {
            return Err(L402Error::WebhookAuth(format!(
                "signature timestamp {t} outside tolerance"
            )));
        }

        let mut signed = format!("{t}.").into_bytes();
        signed.extend_from_slice(body);
        let expected = compute_hmac(&self.secret, &signed);

        if candidates
            .iter()
            .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
        {
            Ok(())
        } else {
            Err(L402Error::WebhookAuth("no matching v1 signature".to_string()))
        }
    }
}

/// Build a `Stripe-Signature` header value for `body` signed at `timestamp`.
pub fn signature_header_value(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(body);
    format!("t={timestamp},v1={}", compute_hmac(secret, &signed))
}

#[async_trait]
impl WebhookVerifier for StripeWebhook {
    fn rail(&self) -> Rail {
        Rail::Stripe
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn authenticate(&self, signature: Option<&str>, body: &[u8]) -> Result<(), L402Error> {
        let header = signature
            .ok_or_else(|| L402Error::WebhookAuth(format!("missing {SIGNATURE_HEADER} header")))?;
        self.verify_at(header, body, chrono::Utc::now().timestamp())
    }

    async fn normalize(&self, body: &[u8]) -> Result<Normalized, L402Error> {
        let event = parse_body(body)?;
        let event_type = event["type"]
            .as_str()
            .ok_or_else(|| L402Error::Validation("event has no type".to_string()))?;

        if event_type != COMPLETION_EVENT {
            return Ok(Normalized::Ignored {
                event_type: event_type.to_string(),
            });
        }

        let session = &event["data"]["object"];
        if session["payment_status"].as_str() != Some("paid") {
            return Ok(Normalized::Ignored {
                event_type: format!(
                    "{event_type} ({})",
                    session["payment_status"].as_str().unwrap_or("unknown")
                ),
            });
        }

        let correlation_id = session["metadata"]["request_id"]
            .as_str()
            .or_else(|| session["client_reference_id"].as_str())
            .ok_or_else(|| L402Error::Validation("session has no request id".to_string()))?;

        let mut settlement = SettlementEvent::new(correlation_id);
        if let (Some(amount), Some(currency)) =
            (session["amount_total"].as_i64(), session["currency"].as_str())
        {
            settlement = settlement.with_amount(amount, currency.to_uppercase());
        }
        Ok(Normalized::Completion(settlement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &[u8] = b"whsec_test_secret";

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = StripeWebhook::new(SECRET);
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = signature_header_value(SECRET, 1_700_000_000, body);
        assert!(verifier.verify_at(&header, body, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let verifier = StripeWebhook::new(SECRET);
        let body = b"{}";
        let header = signature_header_value(SECRET, 1_700_000_000, body);
        assert!(matches!(
            verifier.verify_at(&header, body, 1_700_000_301),
            Err(L402Error::WebhookAuth(_))
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let verifier = StripeWebhook::new(SECRET);
        let header = signature_header_value(SECRET, 1_700_000_000, b"{\"a\":1}");
        assert!(verifier
            .verify_at(&header, b"{\"a\":2}", 1_700_000_000)
            .is_err());
        assert!(verifier.authenticate(None, b"{}").is_err());
        assert!(verifier
            .verify_at("v1=deadbeef", b"{}", 1_700_000_000)
            .is_err());
    }

    #[tokio::test]
    async fn test_normalize_paid_session() {
        let verifier = StripeWebhook::new(SECRET);
        let body = json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "client_reference_id": "req-1",
                "payment_status": "paid",
                "amount_total": 499,
                "currency": "usd",
                "metadata": { "request_id": "req-1", "user_id": "u", "offer_id": "offer_a896b13c" }
            }}
        });
        let normalized = verifier
            .normalize(body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(
            normalized,
            Normalized::Completion(SettlementEvent::new("req-1").with_amount(499, "USD"))
        );
    }

    #[tokio::test]
    async fn test_normalize_ignores_other_events() {
        let verifier = StripeWebhook::new(SECRET);
        let body = json!({ "type": "checkout.session.expired", "data": { "object": {} } });
        assert!(matches!(
            verifier.normalize(body.to_string().as_bytes()).await.unwrap(),
            Normalized::Ignored { .. }
        ));

        let unpaid = json!({
            "type": "checkout.session.completed",
            "data": { "object": { "payment_status": "unpaid", "client_reference_id": "req-1" } }
        });
        assert!(matches!(
            verifier.normalize(unpaid.to_string().as_bytes()).await.unwrap(),
            Normalized::Ignored { .. }
        ));
    }
}
