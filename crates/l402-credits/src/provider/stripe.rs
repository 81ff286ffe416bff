use async_trait::async_trait;

use super::{read_json, ChargeProvider, ChargeRequest, CreatedCharge};
use crate::error::L402Error;
use crate::payment::{ChargeDescriptor, Rail};

pub const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com";

/// Stripe Checkout Sessions.
///
/// Stripe assigns its own session id, but the correlation id is the locally
/// chosen request id, carried in `client_reference_id` and session metadata
/// and echoed back in `checkout.session.completed`.
pub struct StripeCheckout {
    client: reqwest::Client,
    api_url: String,
    secret_key: String,
    success_url: String,
}

impl StripeCheckout {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        secret_key: impl Into<String>,
        success_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            secret_key: secret_key.into(),
            success_url: success_url.into(),
        }
    }
}

/// Form fields for `POST /v1/checkout/sessions`.
pub fn session_form(charge: &ChargeRequest<'_>, success_url: &str) -> Vec<(&'static str, String)> {
    let offer = charge.offer;
    vec![
        ("mode", "payment".to_string()),
        ("success_url", success_url.to_string()),
        ("client_reference_id", charge.request_id.to_string()),
        ("expires_at", charge.expires_at.to_string()),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "line_items[0][price_data][currency]",
            offer.currency.to_lowercase(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            offer.amount.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            offer.title.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][description]",
            offer.description.to_string(),
        ),
        ("metadata[request_id]", charge.request_id.to_string()),
        ("metadata[user_id]", charge.user_id.to_string()),
        ("metadata[offer_id]", offer.id.to_string()),
    ]
}

#[async_trait]
impl ChargeProvider for StripeCheckout {
    fn rail(&self) -> Rail {
        Rail::Stripe
    }

    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        let url = format!(
            "{}/v1/checkout/sessions",
            self.api_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&session_form(charge, &self.success_url))
            .send()
            .await
            .map_err(|e| L402Error::provider(Rail::Stripe, format!("request failed: {e}")))?;

        let session = read_json(Rail::Stripe, response).await?;
        let checkout_url = session["url"]
            .as_str()
            .ok_or_else(|| L402Error::provider(Rail::Stripe, "checkout session has no url"))?;

        tracing::info!(
            session_id = session["id"].as_str().unwrap_or_default(),
            request_id = %charge.request_id,
            "created Stripe checkout session"
        );

        Ok(CreatedCharge {
            correlation_id: charge.request_id.to_string(),
            descriptor: ChargeDescriptor::Stripe {
                checkout_url: checkout_url.to_string(),
            },
        })
    }
}
