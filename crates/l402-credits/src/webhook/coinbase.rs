use async_trait::async_trait;

use super::{parse_body, Normalized, WebhookVerifier};
use crate::error::L402Error;
use crate::hmac::verify_hmac;
use crate::payment::{parse_minor_units, Rail, SettlementEvent};

pub const SIGNATURE_HEADER: &str = "X-CC-Webhook-Signature";

const COMPLETION_EVENT: &str = "charge:confirmed";

/// Coinbase Commerce webhooks: hex HMAC-SHA256 of the raw body.
pub struct CoinbaseWebhook {
    secret: Vec<u8>,
    /// Events tagged with a different `metadata.app_id` belong to another
    /// deployment sharing the account.
    app_id: Option<String>,
}

impl CoinbaseWebhook {
    pub fn new(secret: impl Into<Vec<u8>>, app_id: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            app_id,
        }
    }
}

#[async_trait]
impl WebhookVerifier for CoinbaseWebhook {
    fn rail(&self) -> Rail {
        Rail::Coinbase
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn authenticate(&self, signature: Option<&str>, body: &[u8]) -> Result<(), L402Error> {
        let signature = signature
            .ok_or_else(|| L402Error::WebhookAuth(format!("missing {SIGNATURE_HEADER} header")))?;
        if verify_hmac(&self.secret, body, signature) {
            Ok(())
        } else {
            Err(L402Error::WebhookAuth("signature mismatch".to_string()))
        }
    }

    async fn normalize(&self, body: &[u8]) -> Result<Normalized, L402Error> {
        let payload = parse_body(body)?;
        let event = &payload["event"];
        let event_type = event["type"]
            .as_str()
            .ok_or_else(|| L402Error::Validation("event has no type".to_string()))?;

        if event_type != COMPLETION_EVENT {
            return Ok(Normalized::Ignored {
                event_type: event_type.to_string(),
            });
        }

        let charge = &event["data"];
        if let Some(expected) = &self.app_id {
            let app_id = charge["metadata"]["app_id"].as_str();
            if app_id != Some(expected.as_str()) {
                tracing::warn!(app_id = ?app_id, "dropping Coinbase event for another app");
                return Ok(Normalized::Ignored {
                    event_type: format!("{event_type} (foreign app_id)"),
                });
            }
        }

        let code = charge["code"]
            .as_str()
            .ok_or_else(|| L402Error::Validation("charge has no code".to_string()))?;

        let mut settlement = SettlementEvent::new(code);
        let local = &charge["pricing"]["local"];
        if let (Some(amount), Some(currency)) = (
            local["amount"].as_str().and_then(|a| parse_minor_units(a, 2)),
            local["currency"].as_str(),
        ) {
            settlement = settlement.with_amount(amount, currency.to_uppercase());
        }
        Ok(Normalized::Completion(settlement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmac::compute_hmac;
    use serde_json::json;

    fn confirmed(app_id: &str) -> Vec<u8> {
        json!({
            "id": 1,
            "event": {
                "type": "charge:confirmed",
                "data": {
                    "code": "66BEOV2A",
                    "metadata": { "app_id": app_id },
                    "pricing": { "local": { "amount": "0.99", "currency": "USD" } }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_authenticate() {
        let verifier = CoinbaseWebhook::new(b"cc-secret".to_vec(), None);
        let body = confirmed("app");
        let sig = compute_hmac(b"cc-secret", &body);
        assert!(verifier.authenticate(Some(&sig), &body).is_ok());
        assert!(verifier.authenticate(Some("00ff"), &body).is_err());
        assert!(verifier.authenticate(None, &body).is_err());
    }

    #[tokio::test]
    async fn test_normalize_confirmed_charge() {
        let verifier = CoinbaseWebhook::new(b"cc-secret".to_vec(), Some("app".to_string()));
        assert_eq!(
            verifier.normalize(&confirmed("app")).await.unwrap(),
            Normalized::Completion(SettlementEvent::new("66BEOV2A").with_amount(99, "USD"))
        );
    }

    #[tokio::test]
    async fn test_foreign_app_id_dropped() {
        let verifier = CoinbaseWebhook::new(b"cc-secret".to_vec(), Some("app".to_string()));
        assert!(matches!(
            verifier.normalize(&confirmed("other-app")).await.unwrap(),
            Normalized::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn test_pending_charge_ignored() {
        let verifier = CoinbaseWebhook::new(b"cc-secret".to_vec(), None);
        let body = json!({ "event": { "type": "charge:pending", "data": { "code": "X" } } });
        assert!(matches!(
            verifier.normalize(body.to_string().as_bytes()).await.unwrap(),
            Normalized::Ignored { .. }
        ));
    }
}
