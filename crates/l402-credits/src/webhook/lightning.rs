use async_trait::async_trait;
use std::sync::Arc;

use super::{parse_body, Normalized, WebhookVerifier};
use crate::error::L402Error;
use crate::hmac::verify_hmac;
use crate::payment::{Rail, SettlementEvent};
use crate::provider::lightning::LightningNode;

pub const SIGNATURE_HEADER: &str = "lightspark-signature";

const COMPLETION_EVENT: &str = "PAYMENT_FINISHED";

/// Lightspark webhooks. The event only names an entity; the paid invoice is
/// looked up on the node after the signature checks out.
pub struct LightningWebhook {
    signing_key: Vec<u8>,
    node: Arc<dyn LightningNode>,
}

impl LightningWebhook {
    pub fn new(signing_key: impl Into<Vec<u8>>, node: Arc<dyn LightningNode>) -> Self {
        Self {
            signing_key: signing_key.into(),
            node,
        }
    }
}

#[async_trait]
impl WebhookVerifier for LightningWebhook {
    fn rail(&self) -> Rail {
        Rail::Lightning
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn authenticate(&self, signature: Option<&str>, body: &[u8]) -> Result<(), L402Error> {
        let signature = signature
            .ok_or_else(|| L402Error::WebhookAuth(format!("missing {SIGNATURE_HEADER} header")))?;
        if verify_hmac(&self.signing_key, body, signature) {
            Ok(())
        } else {
            Err(L402Error::WebhookAuth("signature mismatch".to_string()))
        }
    }

    async fn normalize(&self, body: &[u8]) -> Result<Normalized, L402Error> {
        let event = parse_body(body)?;
        let event_type = event["event_type"]
            .as_str()
            .ok_or_else(|| L402Error::Validation("event has no event_type".to_string()))?;

        if event_type != COMPLETION_EVENT {
            return Ok(Normalized::Ignored {
                event_type: event_type.to_string(),
            });
        }

        let entity_id = event["entity_id"]
            .as_str()
            .ok_or_else(|| L402Error::Validation("event has no entity_id".to_string()))?;

        let payment = self.node.incoming_payment(entity_id).await?;
        let mut settlement = SettlementEvent::new(payment.invoice_id);
        if let Some(msats) = payment.amount_msats {
            settlement = settlement.with_amount(msats, "MSAT");
        }
        Ok(Normalized::Completion(settlement))
    }
}
