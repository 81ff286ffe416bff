//! L402 pay-per-use credits.
//!
//! A caller without credit receives a `402 Payment Required` challenge
//! listing credit bundles. Buying one creates a charge on a payment rail;
//! the rail's verified completion event grants the credits exactly once.
//!
//! # Components
//!
//! - **Catalog** ([`OfferCatalog`]): immutable credit bundles
//! - **Rails** ([`provider`]): Stripe Checkout, Lightning (Lightspark),
//!   Coinbase Commerce, self-custodied Solana addresses
//! - **Price oracle** ([`PriceOracle`]): cached BTC/USD for Lightning pricing
//! - **Webhooks** ([`webhook`]): per-rail authentication and normalization
//! - **Ledger** ([`CreditLedger`]): idempotent, atomic settlement
//! - **Orchestrator** ([`PaymentOrchestrator`]): validated purchase flow
//! - **Monitor** ([`AddressMonitor`]): polls self-custodied addresses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use l402::{CreditLedger, LedgerPolicy, LedgerStore, SettlementEvent, SqliteLedgerStore};
//!
//! let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::open("./l402.db").unwrap());
//! let ledger = CreditLedger::new(store, LedgerPolicy::default());
//!
//! // Safe to call on every delivery of the same event.
//! let outcome = ledger.settle(&SettlementEvent::new("inv_123")).unwrap();
//! println!("{}", outcome.label());
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod hmac;
pub mod offers;
pub mod payment;
pub mod security;
pub mod token;

// Ledger
pub mod ledger;
pub mod store;

// Payment rails
pub mod monitor;
pub mod oracle;
pub mod provider;
pub mod webhook;

// Protocol surface
pub mod challenge;
pub mod orchestrator;

pub use constants::*;
pub use error::L402Error;
pub use payment::*;

pub use challenge::{build_challenge, Challenge, ChallengeConfig};
pub use ledger::{CreditLedger, LedgerPolicy, SettleOutcome};
pub use monitor::{AddressMonitor, BalanceSource, SolanaRpc};
pub use offers::{Offer, OfferCatalog};
pub use oracle::{KrakenRateSource, PriceOracle, RateSource};
pub use orchestrator::{CreatedPaymentRequest, PaymentOrchestrator};
pub use provider::{ChargeProvider, ProviderRegistry};
pub use store::{LedgerStore, SqliteLedgerStore};
pub use webhook::{process_webhook, WebhookOutcome, WebhookVerifier};
