use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::sync::Arc;

use super::{read_json, ChargeProvider, ChargeRequest, CreatedCharge};
use crate::error::L402Error;
use crate::oracle::PriceOracle;
use crate::payment::{ChargeDescriptor, Rail};

pub const DEFAULT_LIGHTSPARK_API_URL: &str = "https://api.lightspark.com/graphql/server/2023-09-13";

const CREATE_INVOICE_MUTATION: &str = r#"
mutation CreateInvoice($node_id: ID!, $amount_msats: Long!, $memo: String, $expiry_secs: Int) {
    create_invoice(input: { node_id: $node_id, amount_msats: $amount_msats, memo: $memo, expiry_secs: $expiry_secs }) {
        invoice {
            id
            data { encoded_payment_request }
        }
    }
}
"#;

const INCOMING_PAYMENT_QUERY: &str = r#"
query IncomingPayment($id: ID!) {
    entity(id: $id) {
        ... on IncomingPayment {
            id
            status
            amount { original_value original_unit }
            payment_request { id }
        }
    }
}
"#;

/// An invoice created on the node.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: String,
    pub encoded_payment_request: String,
}

/// A payment received by the node, resolved from a webhook entity id.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingPayment {
    /// Id of the invoice this payment paid.
    pub invoice_id: String,
    pub amount_msats: Option<i64>,
}

/// Remote Lightning node operations.
#[async_trait]
pub trait LightningNode: Send + Sync {
    async fn create_invoice(
        &self,
        amount_msats: u64,
        memo: &str,
        expiry_secs: i64,
    ) -> Result<Invoice, L402Error>;

    async fn incoming_payment(&self, entity_id: &str) -> Result<IncomingPayment, L402Error>;
}

/// Lightspark GraphQL API client.
pub struct LightsparkClient {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
    client_secret: String,
    node_id: String,
}

impl LightsparkClient {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            node_id: node_id.into(),
        }
    }

    async fn execute(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, L402Error> {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Basic {credentials}"))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| L402Error::provider(Rail::Lightning, format!("request failed: {e}")))?;

        let body = read_json(Rail::Lightning, response).await?;
        if let Some(errors) = body["errors"].as_array() {
            if !errors.is_empty() {
                let message = errors[0]["message"].as_str().unwrap_or("graphql error");
                return Err(L402Error::provider(Rail::Lightning, message));
            }
        }
        Ok(body["data"].clone())
    }
}

#[async_trait]
impl LightningNode for LightsparkClient {
    async fn create_invoice(
        &self,
        amount_msats: u64,
        memo: &str,
        expiry_secs: i64,
    ) -> Result<Invoice, L402Error> {
        let data = self
            .execute(
                CREATE_INVOICE_MUTATION,
                json!({
                    "node_id": self.node_id,
                    "amount_msats": amount_msats,
                    "memo": memo,
                    "expiry_secs": expiry_secs,
                }),
            )
            .await?;

        let invoice = &data["create_invoice"]["invoice"];
        match (
            invoice["id"].as_str(),
            invoice["data"]["encoded_payment_request"].as_str(),
        ) {
            (Some(id), Some(encoded)) => Ok(Invoice {
                id: id.to_string(),
                encoded_payment_request: encoded.to_string(),
            }),
            _ => Err(L402Error::provider(
                Rail::Lightning,
                "create_invoice returned no invoice",
            )),
        }
    }

    async fn incoming_payment(&self, entity_id: &str) -> Result<IncomingPayment, L402Error> {
        let data = self
            .execute(INCOMING_PAYMENT_QUERY, json!({ "id": entity_id }))
            .await?;
        parse_incoming_payment(&data["entity"])
    }
}

/// Extract the paid invoice and amount from an `IncomingPayment` entity.
pub fn parse_incoming_payment(entity: &serde_json::Value) -> Result<IncomingPayment, L402Error> {
    let invoice_id = entity["payment_request"]["id"].as_str().ok_or_else(|| {
        L402Error::provider(Rail::Lightning, "entity is not an incoming payment")
    })?;

    let amount = &entity["amount"];
    let amount_msats = amount["original_value"].as_i64().and_then(|value| {
        match amount["original_unit"].as_str() {
            Some("MILLISATOSHI") => Some(value),
            Some("SATOSHI") => value.checked_mul(1000),
            _ => None,
        }
    });

    Ok(IncomingPayment {
        invoice_id: invoice_id.to_string(),
        amount_msats,
    })
}

/// Lightning invoices priced in satoshis at the current BTC rate.
pub struct LightningInvoices {
    node: Arc<dyn LightningNode>,
    oracle: Arc<PriceOracle>,
}

impl LightningInvoices {
    pub fn new(node: Arc<dyn LightningNode>, oracle: Arc<PriceOracle>) -> Self {
        Self { node, oracle }
    }
}

#[async_trait]
impl ChargeProvider for LightningInvoices {
    fn rail(&self) -> Rail {
        Rail::Lightning
    }

    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        let sats = self.oracle.cents_to_sats(charge.offer.amount).await?;
        let amount_msats = sats * 1000;
        let expiry_secs = (charge.expires_at - chrono::Utc::now().timestamp()).max(1);

        let invoice = self
            .node
            .create_invoice(amount_msats, charge.offer.title, expiry_secs)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            user_id = %charge.user_id,
            amount_msats,
            "created Lightning invoice"
        );

        Ok(CreatedCharge {
            correlation_id: invoice.id,
            descriptor: ChargeDescriptor::Lightning {
                payment_request: invoice.encoded_payment_request,
                amount_msats,
            },
        })
    }
}
