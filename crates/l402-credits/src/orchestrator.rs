//! Purchase entry point: validate, create the external charge, persist the
//! pending request.
//!
//! The external charge is created first and the pending record second. A
//! failed provider call therefore leaves nothing behind, and every record
//! that exists refers to a real charge.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::constants::CHARGE_HOLD_MARGIN_SECS;
use crate::error::L402Error;
use crate::offers::OfferCatalog;
use crate::payment::{ChargeDescriptor, PaymentRequest, PaymentStatus, Rail, RailParams};
use crate::provider::{ChargeRequest, ProviderRegistry};
use crate::store::LedgerStore;

/// Response body for a created payment request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedPaymentRequest {
    pub payment_request: PaymentRequestView,
    /// RFC 3339.
    pub expires_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequestView {
    pub id: String,
    pub offer_id: String,
    pub credits: i64,
    #[serde(flatten)]
    pub descriptor: ChargeDescriptor,
}

pub struct PaymentOrchestrator {
    catalog: OfferCatalog,
    providers: ProviderRegistry,
    store: Arc<dyn LedgerStore>,
    min_charge_hold_secs: i64,
}

impl PaymentOrchestrator {
    pub fn new(
        catalog: OfferCatalog,
        providers: ProviderRegistry,
        store: Arc<dyn LedgerStore>,
        min_charge_hold_secs: i64,
    ) -> Self {
        Self {
            catalog,
            providers,
            store,
            min_charge_hold_secs,
        }
    }

    pub fn catalog(&self) -> &OfferCatalog {
        &self.catalog
    }

    pub fn enabled_rails(&self) -> Vec<Rail> {
        self.providers.enabled_rails()
    }

    pub async fn create_payment_request(
        &self,
        user_id: &str,
        offer_id: &str,
        payment_method: &str,
        params: &RailParams,
    ) -> Result<CreatedPaymentRequest, L402Error> {
        let rail: Rail = payment_method.parse()?;
        let provider = self.providers.get(rail).ok_or_else(|| {
            L402Error::Validation(format!("payment method {rail} is not enabled"))
        })?;
        let offer = self
            .catalog
            .get_offer(offer_id)
            .ok_or_else(|| L402Error::Validation(format!("unknown offer: {offer_id}")))?;
        if !offer.supports(rail) {
            return Err(L402Error::Validation(format!(
                "offer {offer_id} cannot be paid with {rail}"
            )));
        }
        provider.validate_params(params)?;

        let now = Utc::now().timestamp();
        let expires_at =
            now + self.min_charge_hold_secs.max(provider.min_hold_secs()) + CHARGE_HOLD_MARGIN_SECS;
        let request_id = uuid::Uuid::new_v4().to_string();

        let created = provider
            .create_charge(&ChargeRequest {
                request_id: &request_id,
                user_id,
                offer,
                expires_at,
                params,
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(rail = %rail, offer_id = %offer_id, error = %e, "charge creation failed");
            })?;

        let record = PaymentRequest {
            id: created.correlation_id.clone(),
            user_id: user_id.to_string(),
            offer_id: offer.id.to_string(),
            rail,
            status: PaymentStatus::Pending,
            amount: offer.amount,
            currency: offer.currency.to_string(),
            credits: offer.credits,
            created_at: now,
            expires_at,
            completed_at: None,
        };

        if let Err(e) = self.store.insert_payment_request(&record) {
            tracing::error!(
                rail = %rail,
                correlation_id = %record.id,
                user_id = %user_id,
                error = %e,
                "external charge created but pending record was not persisted"
            );
            return Err(e);
        }

        provider.activate(&record);

        tracing::info!(
            rail = %rail,
            correlation_id = %record.id,
            user_id = %user_id,
            offer_id = %offer_id,
            expires_at,
            "payment request created"
        );

        Ok(CreatedPaymentRequest {
            payment_request: PaymentRequestView {
                id: record.id,
                offer_id: record.offer_id,
                credits: record.credits,
                descriptor: created.descriptor,
            },
            expires_at: Utc
                .timestamp_opt(expires_at, 0)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        })
    }
}
