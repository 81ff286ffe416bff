//! Credit ledger: idempotent settlement and credit consumption.
//!
//! All balance changes go through [`CreditLedger`]. Settlement is safe to
//! invoke any number of times for the same correlation id: only the first
//! verified event for a payable request grants credits.

use std::sync::Arc;

use crate::error::L402Error;
use crate::payment::{Payment, PaymentRequest, PaymentStatus, SettlementEvent, User};
use crate::store::LedgerStore;

/// Settlement rules that are a business decision rather than an invariant.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    /// Grant credits for a verified payment that completes after the request
    /// expired. The payer has paid, so this defaults to `true`.
    pub accept_late_settlements: bool,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            accept_late_settlements: true,
        }
    }
}

/// Result of a settlement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// Credits granted. Returned exactly once per payment request.
    Settled {
        request: PaymentRequest,
        payment: Payment,
        /// User balance after the grant.
        balance: i64,
    },
    AlreadySettled,
    /// No payment request has this correlation id.
    NotFound,
    /// The request expired and late settlements are refused.
    Expired,
    /// The request is in the terminal `failed` state.
    Failed,
    /// The provider reported less than the request's price.
    AmountMismatch {
        expected: i64,
        observed: i64,
        currency: String,
    },
}

impl SettleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SettleOutcome::Settled { .. } => "settled",
            SettleOutcome::AlreadySettled => "already_settled",
            SettleOutcome::NotFound => "not_found",
            SettleOutcome::Expired => "expired",
            SettleOutcome::Failed => "failed",
            SettleOutcome::AmountMismatch { .. } => "amount_mismatch",
        }
    }
}

/// Decide whether `request` may be settled by `event`.
///
/// Returns the refusal outcome, or `None` when settlement should proceed.
/// Stores call this inside their settlement transaction.
pub fn assess_settlement(
    request: &PaymentRequest,
    event: &SettlementEvent,
    policy: &LedgerPolicy,
    now: i64,
) -> Option<SettleOutcome> {
    match request.status {
        PaymentStatus::Completed => return Some(SettleOutcome::AlreadySettled),
        PaymentStatus::Failed => return Some(SettleOutcome::Failed),
        PaymentStatus::Expired if !policy.accept_late_settlements => {
            return Some(SettleOutcome::Expired)
        }
        PaymentStatus::Pending if request.expires_at < now && !policy.accept_late_settlements => {
            return Some(SettleOutcome::Expired)
        }
        _ => {}
    }

    if let (Some(observed), Some(currency)) = (event.amount, event.currency.as_deref()) {
        if currency.eq_ignore_ascii_case(&request.currency) && observed < request.amount {
            return Some(SettleOutcome::AmountMismatch {
                expected: request.amount,
                observed,
                currency: request.currency.clone(),
            });
        }
    }

    None
}

/// Authoritative owner of user balances.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    policy: LedgerPolicy,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn LedgerStore>, policy: LedgerPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Settle a verified event exactly once.
    pub fn settle(&self, event: &SettlementEvent) -> Result<SettleOutcome, L402Error> {
        let now = chrono::Utc::now().timestamp();
        let outcome = self.store.settle(event, &self.policy, now)?;

        match &outcome {
            SettleOutcome::Settled {
                request,
                payment,
                balance,
            } => tracing::info!(
                correlation_id = %event.correlation_id,
                user_id = %request.user_id,
                rail = %request.rail,
                credits = payment.credits,
                balance,
                "payment settled"
            ),
            SettleOutcome::AmountMismatch {
                expected,
                observed,
                currency,
            } => tracing::warn!(
                correlation_id = %event.correlation_id,
                expected,
                observed,
                currency = %currency,
                "settlement refused: provider reported less than the price"
            ),
            other => tracing::info!(
                correlation_id = %event.correlation_id,
                outcome = other.label(),
                "settlement was a no-op"
            ),
        }

        Ok(outcome)
    }

    /// Debit `amount` credits for a metered call.
    pub fn consume(&self, user_id: &str, amount: i64) -> Result<User, L402Error> {
        let user = self.store.consume_credits(user_id, amount)?;
        tracing::debug!(user_id = %user_id, amount, balance = user.credits, "credits consumed");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::Rail;

    fn request(status: PaymentStatus, expires_at: i64) -> PaymentRequest {
        PaymentRequest {
            id: "cs_1".to_string(),
            user_id: "u".to_string(),
            offer_id: "offer_a896b13c".to_string(),
            rail: Rail::Stripe,
            status,
            amount: 499,
            currency: "USD".to_string(),
            credits: 600,
            created_at: 0,
            expires_at,
            completed_at: None,
        }
    }

    #[test]
    fn test_completed_is_already_settled() {
        let r = request(PaymentStatus::Completed, 100);
        let out = assess_settlement(&r, &SettlementEvent::new("cs_1"), &LedgerPolicy::default(), 0);
        assert_eq!(out, Some(SettleOutcome::AlreadySettled));
    }

    #[test]
    fn test_failed_is_never_settled() {
        let r = request(PaymentStatus::Failed, 100);
        let out = assess_settlement(&r, &SettlementEvent::new("cs_1"), &LedgerPolicy::default(), 0);
        assert_eq!(out, Some(SettleOutcome::Failed));
    }

    #[test]
    fn test_late_settlement_follows_policy() {
        let r = request(PaymentStatus::Expired, 100);
        let event = SettlementEvent::new("cs_1");

        let lenient = LedgerPolicy::default();
        assert_eq!(assess_settlement(&r, &event, &lenient, 500), None);

        let strict = LedgerPolicy {
            accept_late_settlements: false,
        };
        assert_eq!(
            assess_settlement(&r, &event, &strict, 500),
            Some(SettleOutcome::Expired)
        );

        // Past expiry but not yet swept
        let pending = request(PaymentStatus::Pending, 100);
        assert_eq!(
            assess_settlement(&pending, &event, &strict, 500),
            Some(SettleOutcome::Expired)
        );
        assert_eq!(assess_settlement(&pending, &event, &strict, 50), None);
    }

    #[test]
    fn test_underpayment_in_request_currency_refused() {
        let r = request(PaymentStatus::Pending, 100);
        let event = SettlementEvent::new("cs_1").with_amount(450, "usd");
        assert_eq!(
            assess_settlement(&r, &event, &LedgerPolicy::default(), 0),
            Some(SettleOutcome::AmountMismatch {
                expected: 499,
                observed: 450,
                currency: "USD".to_string(),
            })
        );
    }

    #[test]
    fn test_amount_in_other_currency_not_compared() {
        let r = request(PaymentStatus::Pending, 100);
        let event = SettlementEvent::new("cs_1").with_amount(1, "USDC");
        assert_eq!(assess_settlement(&r, &event, &LedgerPolicy::default(), 0), None);
    }
}
