//! The `402 Payment Required` challenge document.

use chrono::{TimeZone, Utc};
use serde::Serialize;

use crate::offers::OfferCatalog;
use crate::payment::Rail;
use crate::token;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Static inputs to every challenge.
#[derive(Clone)]
pub struct ChallengeConfig {
    /// Absolute URL of `POST /l402/payment-request`.
    pub payment_request_url: String,
    pub terms_url: String,
    pub token_secret: Vec<u8>,
    pub token_ttl_secs: i64,
    pub client_note: String,
}

impl std::fmt::Debug for ChallengeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeConfig")
            .field("payment_request_url", &self.payment_request_url)
            .field("terms_url", &self.terms_url)
            .field("token_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeOffer {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Price in cents.
    pub amount: i64,
    pub currency: String,
    pub credits: i64,
    pub payment_methods: Vec<Rail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeMetadata {
    pub user_id: String,
    pub client_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Challenge {
    pub version: String,
    pub offers: Vec<ChallengeOffer>,
    pub payment_request_url: String,
    pub payment_context_token: String,
    pub terms_url: String,
    /// Expiry of the context token, RFC 3339.
    pub expiry: String,
    pub metadata: ChallengeMetadata,
}

/// Assemble the challenge for `user_id`.
///
/// Offers are restricted to `enabled` rails; an offer with none of its rails
/// enabled is left out.
pub fn build_challenge(
    config: &ChallengeConfig,
    catalog: &OfferCatalog,
    enabled: &[Rail],
    user_id: &str,
    now: i64,
) -> Challenge {
    let offers = catalog
        .offers()
        .iter()
        .filter_map(|offer| {
            let payment_methods: Vec<Rail> = offer
                .rails
                .iter()
                .copied()
                .filter(|rail| enabled.contains(rail))
                .collect();
            if payment_methods.is_empty() {
                return None;
            }
            Some(ChallengeOffer {
                id: offer.id.to_string(),
                title: offer.title.to_string(),
                description: offer.description.to_string(),
                amount: offer.amount,
                currency: offer.currency.to_string(),
                credits: offer.credits,
                payment_methods,
            })
        })
        .collect();

    let expires_at = now + config.token_ttl_secs;
    let expiry = Utc
        .timestamp_opt(expires_at, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    Challenge {
        version: PROTOCOL_VERSION.to_string(),
        offers,
        payment_request_url: config.payment_request_url.clone(),
        payment_context_token: token::issue(&config.token_secret, user_id, expires_at),
        terms_url: config.terms_url.clone(),
        expiry,
        metadata: ChallengeMetadata {
            user_id: user_id.to_string(),
            client_note: config.client_note.clone(),
        },
    }
}
