//! Inbound provider callbacks: authenticate, normalize, settle.
//!
//! Each step yields a typed result and [`process_webhook`] folds them into a
//! single [`WebhookOutcome`]. The HTTP layer decides the acknowledgment from
//! that outcome alone.

pub mod coinbase;
pub mod lightning;
pub mod stripe;

use async_trait::async_trait;

use crate::error::L402Error;
use crate::ledger::{CreditLedger, SettleOutcome};
use crate::payment::{Rail, SettlementEvent};

/// Result of normalizing an authenticated payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Completion(SettlementEvent),
    /// A well-formed event that does not complete a payment.
    Ignored { event_type: String },
}

/// Per-rail webhook authentication and normalization.
#[async_trait]
pub trait WebhookVerifier: Send + Sync {
    fn rail(&self) -> Rail;

    /// Header carrying the provider's signature.
    fn signature_header(&self) -> &'static str;

    /// Authenticate the raw body. Must not parse it.
    fn authenticate(&self, signature: Option<&str>, body: &[u8]) -> Result<(), L402Error>;

    /// Map an authenticated body to a settlement event.
    ///
    /// `Validation`/`Serde` errors mean the payload is malformed; other
    /// errors are downstream failures.
    async fn normalize(&self, body: &[u8]) -> Result<Normalized, L402Error>;
}

/// Final disposition of one webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Settled {
        correlation_id: String,
        credits: i64,
        balance: i64,
    },
    AlreadySettled {
        correlation_id: String,
    },
    UnknownCorrelation {
        correlation_id: String,
    },
    /// Settlement refused by the ledger (expired, failed or underpaid).
    Refused {
        correlation_id: String,
        reason: &'static str,
    },
    Ignored {
        event_type: String,
    },
    Unauthenticated {
        reason: String,
    },
    Malformed {
        reason: String,
    },
    Failed {
        correlation_id: Option<String>,
        error: String,
    },
}

impl WebhookOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Settled { .. } => "settled",
            WebhookOutcome::AlreadySettled { .. } => "already_settled",
            WebhookOutcome::UnknownCorrelation { .. } => "unknown_correlation",
            WebhookOutcome::Refused { .. } => "refused",
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::Unauthenticated { .. } => "unauthenticated",
            WebhookOutcome::Malformed { .. } => "malformed",
            WebhookOutcome::Failed { .. } => "failed",
        }
    }

    /// Whether the delivery is structurally malformed. Every other outcome is
    /// acknowledged with success so providers do not retry.
    pub fn is_malformed(&self) -> bool {
        matches!(self, WebhookOutcome::Malformed { .. })
    }
}

/// Authenticate, normalize and settle one delivery.
pub async fn process_webhook(
    verifier: &dyn WebhookVerifier,
    ledger: &CreditLedger,
    signature: Option<&str>,
    body: &[u8],
) -> WebhookOutcome {
    let rail = verifier.rail();

    if let Err(e) = verifier.authenticate(signature, body) {
        tracing::warn!(rail = %rail, error = %e, body_len = body.len(), "webhook authentication failed");
        return WebhookOutcome::Unauthenticated {
            reason: e.to_string(),
        };
    }

    let event = match verifier.normalize(body).await {
        Ok(Normalized::Completion(event)) => event,
        Ok(Normalized::Ignored { event_type }) => {
            tracing::info!(rail = %rail, event_type = %event_type, "ignoring non-completion webhook event");
            return WebhookOutcome::Ignored { event_type };
        }
        Err(e @ (L402Error::Validation(_) | L402Error::Serde(_))) => {
            tracing::warn!(rail = %rail, error = %e, "malformed webhook payload");
            return WebhookOutcome::Malformed {
                reason: e.to_string(),
            };
        }
        Err(e) => {
            tracing::error!(rail = %rail, error = %e, "webhook normalization failed");
            return WebhookOutcome::Failed {
                correlation_id: None,
                error: e.to_string(),
            };
        }
    };

    let correlation_id = event.correlation_id.clone();
    match ledger.settle(&event) {
        Ok(SettleOutcome::Settled {
            payment, balance, ..
        }) => WebhookOutcome::Settled {
            correlation_id,
            credits: payment.credits,
            balance,
        },
        Ok(SettleOutcome::AlreadySettled) => WebhookOutcome::AlreadySettled { correlation_id },
        Ok(SettleOutcome::NotFound) => {
            tracing::warn!(rail = %rail, correlation_id = %correlation_id, "webhook for unknown payment request");
            WebhookOutcome::UnknownCorrelation { correlation_id }
        }
        Ok(refused) => WebhookOutcome::Refused {
            correlation_id,
            reason: refused.label(),
        },
        Err(e) => {
            tracing::error!(
                rail = %rail,
                correlation_id = %correlation_id,
                error = %e,
                "settlement failed for verified webhook; reconcile manually"
            );
            WebhookOutcome::Failed {
                correlation_id: Some(correlation_id),
                error: e.to_string(),
            }
        }
    }
}

/// Parse a JSON body, reporting failures as malformed input.
pub(crate) fn parse_body(body: &[u8]) -> Result<serde_json::Value, L402Error> {
    serde_json::from_slice(body)
        .map_err(|e| L402Error::Validation(format!("body is not valid JSON: {e}")))
}
