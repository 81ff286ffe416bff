//! Payment rail adapters.
//!
//! Each rail turns an offer into a provider-side charge and reports the
//! correlation id that the provider's completion event will carry.
//!
//! - [`stripe::StripeCheckout`]: hosted card checkout sessions
//! - [`lightning::LightningInvoices`]: Lightning invoices priced via the [`crate::oracle`]
//! - [`coinbase::CoinbaseCharges`]: custodial on-chain charges
//! - [`solana::SolanaAddresses`]: self-custodied derived addresses, settled by polling

pub mod coinbase;
pub mod lightning;
pub mod solana;
pub mod stripe;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::L402Error;
use crate::offers::Offer;
use crate::payment::{ChargeDescriptor, PaymentRequest, Rail, RailParams};

/// Everything an adapter needs to open a charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest<'a> {
    /// Identifier chosen locally before the provider call. Rails that have no
    /// provider-side identifier of their own use it as the correlation id.
    pub request_id: &'a str,
    pub user_id: &'a str,
    pub offer: &'a Offer,
    /// Unix timestamp after which the charge should no longer be payable.
    pub expires_at: i64,
    pub params: &'a RailParams,
}

/// A charge that exists at the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedCharge {
    pub correlation_id: String,
    pub descriptor: ChargeDescriptor,
}

/// One payment rail.
#[async_trait]
pub trait ChargeProvider: Send + Sync {
    fn rail(&self) -> Rail;

    /// Shortest expiry this rail can work with, in seconds.
    fn min_hold_secs(&self) -> i64 {
        self.rail().min_hold_secs()
    }

    /// Reject rail parameters this provider cannot honour. Called before any
    /// remote call.
    fn validate_params(&self, _params: &RailParams) -> Result<(), L402Error> {
        Ok(())
    }

    /// Create the charge at the provider.
    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error>;

    /// Hook run once the pending request for `charge` has been persisted.
    fn activate(&self, _request: &PaymentRequest) {}
}

/// Enabled rails, keyed by [`Rail`]. A rail is enabled iff it is registered.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Rail, Arc<dyn ChargeProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ChargeProvider>) {
        self.providers.insert(provider.rail(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ChargeProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, rail: Rail) -> Option<&Arc<dyn ChargeProvider>> {
        self.providers.get(&rail)
    }

    /// Enabled rails in a stable order.
    pub fn enabled_rails(&self) -> Vec<Rail> {
        Rail::ALL
            .into_iter()
            .filter(|r| self.providers.contains_key(r))
            .collect()
    }
}

/// Read a provider response body, turning non-2xx statuses into a
/// [`L402Error::Provider`] that carries the upstream message for the logs.
pub(crate) async fn read_json(
    rail: Rail,
    response: reqwest::Response,
) -> Result<serde_json::Value, L402Error> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| L402Error::provider(rail, format!("failed to read response: {e}")))?;

    if !status.is_success() {
        tracing::error!(rail = %rail, status = %status, body = %body, "provider returned non-success response");
        return Err(L402Error::provider(rail, format!("provider returned {status}")));
    }

    serde_json::from_str(&body)
        .map_err(|e| L402Error::provider(rail, format!("invalid provider response: {e}")))
}
