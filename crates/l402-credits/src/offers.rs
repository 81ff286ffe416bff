//! Static catalog of purchasable credit bundles.
//!
//! Offers are immutable: a payment request copies the price and credit grant
//! at creation, and catalog entries are never edited in place.

use serde::Serialize;

use crate::payment::Rail;

/// A purchasable credit bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Price in cents.
    pub amount: i64,
    pub currency: &'static str,
    pub credits: i64,
    pub rails: &'static [Rail],
}

impl Offer {
    pub fn supports(&self, rail: Rail) -> bool {
        self.rails.contains(&rail)
    }
}

const CRYPTO_RAILS: &[Rail] = &[Rail::Lightning, Rail::Coinbase, Rail::Solana];
const ALL_RAILS: &[Rail] = &[Rail::Lightning, Rail::Coinbase, Rail::Solana, Rail::Stripe];

static DEFAULT_OFFERS: [Offer; 3] = [
    Offer {
        id: "offer_c668e0c0",
        title: "1 Credit Package",
        description: "Purchase 1 credit for API access",
        amount: 1,
        currency: "USD",
        credits: 1,
        rails: CRYPTO_RAILS,
    },
    Offer {
        id: "offer_97bf23f7",
        title: "120 Credits Package",
        description: "Purchase 120 credits for API access",
        amount: 99,
        currency: "USD",
        credits: 120,
        rails: CRYPTO_RAILS,
    },
    Offer {
        id: "offer_a896b13c",
        title: "600 Credits Package",
        description: "Purchase 600 credits for API access",
        amount: 499,
        currency: "USD",
        credits: 600,
        rails: ALL_RAILS,
    },
];

/// Read-only offer lookup.
#[derive(Debug, Clone)]
pub struct OfferCatalog {
    offers: &'static [Offer],
}

impl OfferCatalog {
    pub fn new(offers: &'static [Offer]) -> Self {
        Self { offers }
    }

    pub fn get_offer(&self, id: &str) -> Option<&Offer> {
        self.offers.iter().find(|o| o.id == id)
    }

    pub fn offers(&self) -> &[Offer] {
        self.offers
    }
}

impl Default for OfferCatalog {
    fn default() -> Self {
        Self::new(&DEFAULT_OFFERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_offer() {
        let catalog = OfferCatalog::default();
        let offer = catalog.get_offer("offer_97bf23f7").unwrap();
        assert_eq!(offer.credits, 120);
        assert_eq!(offer.amount, 99);
        assert!(catalog.get_offer("offer_missing").is_none());
    }

    #[test]
    fn test_offer_ids_are_unique() {
        let catalog = OfferCatalog::default();
        let mut ids: Vec<_> = catalog.offers().iter().map(|o| o.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.offers().len());
    }

    #[test]
    fn test_card_checkout_only_on_largest_bundle() {
        let catalog = OfferCatalog::default();
        let card: Vec<_> = catalog
            .offers()
            .iter()
            .filter(|o| o.supports(Rail::Stripe))
            .map(|o| o.id)
            .collect();
        assert_eq!(card, vec!["offer_a896b13c"]);
    }
}
