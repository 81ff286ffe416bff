//! Records of the payment lifecycle: users, payment requests, settlement
//! records and the transient values exchanged with providers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::L402Error;

/// A payment rail: one provider integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    /// Hosted card checkout (Stripe Checkout Sessions).
    Stripe,
    /// Lightning invoice (Lightspark).
    Lightning,
    /// Custodial on-chain charge (Coinbase Commerce).
    Coinbase,
    /// Self-custodied USDC address on Solana, settled by polling.
    Solana,
}

impl Rail {
    pub const ALL: [Rail; 4] = [Rail::Stripe, Rail::Lightning, Rail::Coinbase, Rail::Solana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Stripe => "stripe",
            Rail::Lightning => "lightning",
            Rail::Coinbase => "coinbase",
            Rail::Solana => "solana",
        }
    }

    /// Shortest hold the provider needs to complete a charge, in seconds.
    ///
    /// Stripe rejects checkout sessions expiring in under 30 minutes and
    /// Coinbase charges stay open for an hour. The Solana hold comes from the
    /// monitor timeout instead.
    pub fn min_hold_secs(&self) -> i64 {
        match self {
            Rail::Stripe => 30 * 60,
            Rail::Coinbase => 60 * 60,
            Rail::Lightning => 10 * 60,
            Rail::Solana => 0,
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rail {
    type Err = L402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Rail::Stripe),
            "lightning" => Ok(Rail::Lightning),
            "coinbase" => Ok(Rail::Coinbase),
            "solana" => Ok(Rail::Solana),
            other => Err(L402Error::Validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

/// Closed lifecycle of a payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Expired,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = L402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "expired" => Ok(PaymentStatus::Expired),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(L402Error::Storage(format!("unknown payment status: {other}"))),
        }
    }
}

/// Account holding a credit balance. The id doubles as the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub credits: i64,
    /// Lifetime credits spent on the metered resource.
    pub credits_consumed: i64,
    pub created_at: i64,
}

/// A pending-or-finished purchase, keyed by the rail's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: String,
    pub user_id: String,
    pub offer_id: String,
    pub rail: Rail,
    pub status: PaymentStatus,
    /// Price in the currency's minor unit (cents for USD).
    pub amount: i64,
    pub currency: String,
    pub credits: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub completed_at: Option<i64>,
}

/// Append-only settlement record, one per completed payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub payment_request_id: String,
    pub credits: i64,
    pub amount: i64,
    pub currency: String,
    pub created_at: i64,
}

/// Rail-specific parameters supplied with a purchase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RailParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Display data returned to the payer. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payment_method", rename_all = "lowercase")]
pub enum ChargeDescriptor {
    Stripe {
        checkout_url: String,
    },
    Lightning {
        payment_request: String,
        amount_msats: u64,
    },
    Coinbase {
        checkout_url: String,
        network: String,
        asset: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    Solana {
        address: String,
        mint: String,
        /// Expected transfer in token base units.
        amount: u64,
    },
}

/// Provider-agnostic view of a verified completion event.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementEvent {
    pub correlation_id: String,
    /// Observed amount in the currency's minor unit, when the provider reports one.
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

impl SettlementEvent {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            amount: None,
            currency: None,
        }
    }

    pub fn with_amount(mut self, amount: i64, currency: impl Into<String>) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency.into());
        self
    }
}

/// Parse a decimal major-unit string ("4.99") into minor units (499).
///
/// Extra fractional digits beyond `decimals` are truncated.
pub fn parse_minor_units(value: &str, decimals: u32) -> Option<i64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let scale = 10i64.checked_pow(decimals)?;
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_digits: String = frac.chars().take(decimals as usize).collect();
    while frac_digits.len() < decimals as usize {
        frac_digits.push('0');
    }
    let frac: i64 = if frac_digits.is_empty() {
        0
    } else {
        frac_digits.parse().ok()?
    };
    whole.checked_mul(scale)?.checked_add(frac)
}

/// Render minor units as a major-unit decimal string ("499" -> "4.99").
pub fn format_minor_units(amount: i64, decimals: u32) -> String {
    let scale = 10i64.pow(decimals);
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rail_roundtrips_through_str() {
        for rail in Rail::ALL {
            assert_eq!(rail.as_str().parse::<Rail>().unwrap(), rail);
        }
        assert!(matches!(
            "paypal".parse::<Rail>(),
            Err(L402Error::Validation(_))
        ));
    }

    #[test]
    fn test_status_parse_rejects_unknown() {
        assert_eq!(
            "completed".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Completed
        );
        assert!("settled".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_parse_minor_units() {
        assert_eq!(parse_minor_units("4.99", 2), Some(499));
        assert_eq!(parse_minor_units("0.01", 2), Some(1));
        assert_eq!(parse_minor_units("5", 2), Some(500));
        assert_eq!(parse_minor_units("1.5", 2), Some(150));
        assert_eq!(parse_minor_units("1.239", 2), Some(123));
        assert_eq!(parse_minor_units("0.99", 6), Some(990_000));
        assert_eq!(parse_minor_units("-1.00", 2), None);
        assert_eq!(parse_minor_units("abc", 2), None);
        assert_eq!(parse_minor_units("", 2), None);
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(499, 2), "4.99");
        assert_eq!(format_minor_units(1, 2), "0.01");
        assert_eq!(format_minor_units(100, 2), "1.00");
    }

    #[test]
    fn test_descriptor_serializes_with_method_tag() {
        let d = ChargeDescriptor::Stripe {
            checkout_url: "https://checkout.stripe.com/c/pay/cs_test".to_string(),
        };
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["payment_method"], "stripe");
        assert_eq!(v["checkout_url"], "https://checkout.stripe.com/c/pay/cs_test");
    }
}
