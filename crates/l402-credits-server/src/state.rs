use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use l402::provider::coinbase::CoinbaseCharges;
use l402::provider::lightning::{LightningInvoices, LightningNode, LightsparkClient};
use l402::provider::solana::{MasterKey, SolanaAddresses};
use l402::provider::stripe::StripeCheckout;
use l402::webhook::coinbase::CoinbaseWebhook;
use l402::webhook::lightning::LightningWebhook;
use l402::webhook::stripe::StripeWebhook;
use l402::{
    build_challenge, AddressMonitor, Challenge, ChallengeConfig, CreditLedger, KrakenRateSource,
    L402Error, LedgerPolicy, LedgerStore, OfferCatalog, PaymentOrchestrator, PriceOracle,
    ProviderRegistry, Rail, SolanaRpc, SqliteLedgerStore, WebhookVerifier,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::market::{CachedQuotes, QuoteSource, YahooQuotes};
use crate::metrics::CHALLENGES_ISSUED;

const DEFAULT_APP_ID: &str = "l402-credits";
const CLIENT_NOTE: &str = "Buy credits with any listed payment method, then retry the request";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn LedgerStore>,
    pub ledger: CreditLedger,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub challenge: Arc<ChallengeConfig>,
    /// Verifier per enabled rail, keyed by the rail's webhook path segment.
    pub webhooks: Arc<HashMap<Rail, Arc<dyn WebhookVerifier>>>,
    pub quotes: Arc<dyn QuoteSource>,
    /// Present when the Solana rail is enabled
    pub monitor: Option<Arc<AddressMonitor>>,
    /// BTC/USD rate behind Lightning invoices, when that rail is enabled
    pub oracle: Option<Arc<PriceOracle>>,
}

impl AppState {
    /// Assemble state from already-built collaborators.
    pub fn new(
        config: ServerConfig,
        ledger: CreditLedger,
        providers: ProviderRegistry,
        webhooks: HashMap<Rail, Arc<dyn WebhookVerifier>>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Self {
        let store = Arc::clone(ledger.store());
        let challenge = ChallengeConfig {
            payment_request_url: config.payment_request_url(),
            terms_url: config.terms_url.clone(),
            token_secret: config.context_token_secret.clone(),
            token_ttl_secs: config.context_token_ttl_secs,
            client_note: CLIENT_NOTE.to_string(),
        };
        let orchestrator = PaymentOrchestrator::new(
            OfferCatalog::default(),
            providers,
            Arc::clone(&store),
            config.min_charge_hold_secs,
        );

        Self {
            config: Arc::new(config),
            store,
            ledger,
            orchestrator: Arc::new(orchestrator),
            challenge: Arc::new(challenge),
            webhooks: Arc::new(webhooks),
            quotes,
            monitor: None,
            oracle: None,
        }
    }

    /// Open the ledger and build every enabled rail's live adapters.
    pub fn from_config(config: ServerConfig) -> Result<Self, L402Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| L402Error::Config(format!("failed to create HTTP client: {e}")))?;

        let store: Arc<dyn LedgerStore> = Arc::new(SqliteLedgerStore::open(&config.db_path)?);
        tracing::info!("Ledger opened at: {}", config.db_path);
        let ledger = CreditLedger::new(
            Arc::clone(&store),
            LedgerPolicy {
                accept_late_settlements: config.accept_late_settlements,
            },
        );

        let mut providers = ProviderRegistry::new();
        let mut webhooks: HashMap<Rail, Arc<dyn WebhookVerifier>> = HashMap::new();
        let mut monitor = None;
        let mut price_oracle = None;

        if let Some(ref stripe) = config.stripe {
            providers.register(Arc::new(StripeCheckout::new(
                http_client.clone(),
                &stripe.api_url,
                &stripe.secret_key,
                &stripe.success_url,
            )));
            webhooks.insert(
                Rail::Stripe,
                Arc::new(StripeWebhook::new(stripe.webhook_secret.as_bytes())),
            );
        }

        if let Some(ref lightning) = config.lightning {
            let node: Arc<dyn LightningNode> = Arc::new(LightsparkClient::new(
                http_client.clone(),
                &lightning.api_url,
                &lightning.client_id,
                &lightning.client_secret,
                &lightning.node_id,
            ));
            let oracle = Arc::new(PriceOracle::new(
                Box::new(KrakenRateSource::new(
                    http_client.clone(),
                    &lightning.price_feed_url,
                )),
                Duration::from_secs(config.price_cache_ttl_secs),
            ));
            providers.register(Arc::new(LightningInvoices::new(
                Arc::clone(&node),
                Arc::clone(&oracle),
            )));
            price_oracle = Some(oracle);
            webhooks.insert(
                Rail::Lightning,
                Arc::new(LightningWebhook::new(
                    lightning.webhook_signing_key.as_bytes(),
                    node,
                )),
            );
        }

        if let Some(ref coinbase) = config.coinbase {
            providers.register(Arc::new(CoinbaseCharges::new(
                http_client.clone(),
                &coinbase.api_url,
                &coinbase.api_key,
                coinbase.app_id.as_deref().unwrap_or(DEFAULT_APP_ID),
                &coinbase.redirect_url,
            )));
            webhooks.insert(
                Rail::Coinbase,
                Arc::new(CoinbaseWebhook::new(
                    coinbase.webhook_secret.as_bytes(),
                    coinbase.app_id.clone(),
                )),
            );
        }

        if let Some(ref solana) = config.solana {
            let master = MasterKey::load_or_create(Path::new(&solana.master_key_file))?;
            tracing::info!("Solana master key: {}", master.public_key());
            let address_monitor = Arc::new(AddressMonitor::new(
                Arc::new(SolanaRpc::new(http_client.clone(), &solana.rpc_url)),
                ledger.clone(),
                &solana.usdc_mint,
                Duration::from_secs(config.solana_poll_interval_secs),
            ));
            let addresses = Arc::new(SolanaAddresses::new(
                master,
                Arc::clone(&store),
                Arc::clone(&address_monitor),
                &solana.usdc_mint,
                config.solana_payment_timeout_secs,
            ));
            addresses.resume_pending(chrono::Utc::now().timestamp())?;
            providers.register(addresses);
            monitor = Some(address_monitor);
        }

        let quotes: Arc<dyn QuoteSource> = Arc::new(CachedQuotes::new(
            YahooQuotes::new(http_client, &config.quote_api_url),
            Duration::from_secs(config.quote_cache_ttl_secs),
        ));

        let mut state = Self::new(config, ledger, providers, webhooks, quotes);
        state.monitor = monitor;
        state.oracle = price_oracle;
        Ok(state)
    }

    pub fn enabled_rails(&self) -> Vec<Rail> {
        self.orchestrator.enabled_rails()
    }

    /// Fresh challenge for `user_id`.
    pub fn challenge_for(&self, user_id: &str) -> Challenge {
        build_challenge(
            &self.challenge,
            self.orchestrator.catalog(),
            &self.enabled_rails(),
            user_id,
            chrono::Utc::now().timestamp(),
        )
    }

    /// A 402 response carrying a fresh challenge.
    pub fn payment_required(&self, user_id: &str) -> ServerError {
        CHALLENGES_ISSUED.inc();
        ServerError::PaymentRequired(Box::new(self.challenge_for(user_id)))
    }
}
