use l402::constants::*;
use l402::monitor::DEFAULT_SOLANA_RPC_URL;
use l402::oracle::DEFAULT_PRICE_FEED_URL;
use l402::provider::coinbase::DEFAULT_COINBASE_API_URL;
use l402::provider::lightning::DEFAULT_LIGHTSPARK_API_URL;
use l402::provider::solana::USDC_MINT;
use l402::provider::stripe::DEFAULT_STRIPE_API_URL;
use l402::Rail;
use rand::Rng;
use std::env;
use url::Url;

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_DB_PATH: &str = "./l402.db";
const DEFAULT_TERMS_URL: &str = "https://example.com/terms";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_QUOTE_API_URL: &str = "https://query1.finance.yahoo.com";
const DEFAULT_QUOTE_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_MASTER_KEY_FILE: &str = "./solana_master_key.json";

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub api_url: String,
}

#[derive(Clone)]
pub struct LightningConfig {
    pub client_id: String,
    pub client_secret: String,
    pub node_id: String,
    pub webhook_signing_key: String,
    pub api_url: String,
    pub price_feed_url: String,
}

#[derive(Clone)]
pub struct CoinbaseConfig {
    pub api_key: String,
    pub webhook_secret: String,
    /// Tag written into charge metadata; events carrying another tag are dropped.
    pub app_id: Option<String>,
    /// Where the hosted checkout sends the payer afterwards.
    pub redirect_url: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub master_key_file: String,
    pub usdc_mint: String,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// SQLite ledger path
    pub db_path: String,
    /// Externally reachable base URL, used for the challenge's payment_request_url
    pub public_base_url: String,
    pub terms_url: String,
    /// HMAC key for payment context tokens
    pub context_token_secret: Vec<u8>,
    pub context_token_ttl_secs: i64,
    pub min_charge_hold_secs: i64,
    pub price_cache_ttl_secs: u64,
    pub solana_poll_interval_secs: u64,
    pub solana_payment_timeout_secs: i64,
    /// Grant credits for payments that complete after their request expired
    pub accept_late_settlements: bool,
    pub expiry_sweep_interval_secs: u64,
    pub rate_limit_rpm: u32,
    pub allowed_origins: Vec<String>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
    pub quote_api_url: String,
    pub quote_cache_ttl_secs: u64,
    pub stripe: Option<StripeConfig>,
    pub lightning: Option<LightningConfig>,
    pub coinbase: Option<CoinbaseConfig>,
    pub solana: Option<SolanaConfig>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("public_base_url", &self.public_base_url)
            .field("terms_url", &self.terms_url)
            .field("context_token_secret", &"[REDACTED]")
            .field("context_token_ttl_secs", &self.context_token_ttl_secs)
            .field("min_charge_hold_secs", &self.min_charge_hold_secs)
            .field("price_cache_ttl_secs", &self.price_cache_ttl_secs)
            .field("solana_poll_interval_secs", &self.solana_poll_interval_secs)
            .field("solana_payment_timeout_secs", &self.solana_payment_timeout_secs)
            .field("accept_late_settlements", &self.accept_late_settlements)
            .field("expiry_sweep_interval_secs", &self.expiry_sweep_interval_secs)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("allowed_origins", &self.allowed_origins)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("quote_api_url", &self.quote_api_url)
            .field("stripe", &self.stripe.as_ref().map(|_| "[REDACTED]"))
            .field("lightning", &self.lightning.as_ref().map(|_| "[REDACTED]"))
            .field("coinbase", &self.coinbase.as_ref().map(|_| "[REDACTED]"))
            .field("solana", &self.solana)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let port = vars.parsed("PORT", DEFAULT_PORT)?;
        let db_path = vars.or("DB_PATH", DEFAULT_DB_PATH);

        let public_base_url = vars.or("PUBLIC_BASE_URL", &format!("http://localhost:{port}"));
        Url::parse(&public_base_url).map_err(|_| ConfigError::InvalidUrl(public_base_url.clone()))?;
        let terms_url = vars.or("TERMS_URL", DEFAULT_TERMS_URL);

        let context_token_secret = match vars.get("CONTEXT_TOKEN_SECRET") {
            Some(secret) => {
                if secret.len() < 32 {
                    tracing::warn!(
                        "CONTEXT_TOKEN_SECRET is short ({} bytes); use `openssl rand -hex 32`",
                        secret.len()
                    );
                }
                secret.into_bytes()
            }
            None => {
                tracing::warn!(
                    "CONTEXT_TOKEN_SECRET not set; using a per-process random key, \
                     context tokens will not survive a restart"
                );
                rand::rng().random::<[u8; 32]>().to_vec()
            }
        };

        let allowed_origins = vars
            .get("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let metrics_token = vars.get("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        let stripe = if vars.flag("STRIPE_ENABLED")? {
            Some(StripeConfig {
                secret_key: vars.required("STRIPE_SECRET_KEY")?,
                webhook_secret: vars.required("STRIPE_WEBHOOK_SECRET")?,
                success_url: vars.or("STRIPE_SUCCESS_URL", &public_base_url),
                api_url: vars.or("STRIPE_API_URL", DEFAULT_STRIPE_API_URL),
            })
        } else {
            None
        };

        let lightning = if vars.flag("LIGHTNING_ENABLED")? {
            Some(LightningConfig {
                client_id: vars.required("LIGHTSPARK_API_TOKEN_CLIENT_ID")?,
                client_secret: vars.required("LIGHTSPARK_API_TOKEN_CLIENT_SECRET")?,
                node_id: vars.required("LIGHTSPARK_NODE_ID")?,
                webhook_signing_key: vars.required("LIGHTSPARK_WEBHOOK_SIGNING_KEY")?,
                api_url: vars.or("LIGHTSPARK_API_URL", DEFAULT_LIGHTSPARK_API_URL),
                price_feed_url: vars.or("PRICE_FEED_URL", DEFAULT_PRICE_FEED_URL),
            })
        } else {
            None
        };

        let coinbase = if vars.flag("COINBASE_ENABLED")? {
            let app_id = vars.get("APP_ID");
            if app_id.is_none() {
                tracing::warn!("APP_ID not set; Coinbase events will not be filtered by app");
            }
            Some(CoinbaseConfig {
                api_key: vars.required("COINBASE_COMMERCE_API_KEY")?,
                webhook_secret: vars.required("COINBASE_WEBHOOK_SECRET")?,
                app_id,
                redirect_url: vars.or("HOST", &public_base_url),
                api_url: vars.or("COINBASE_API_URL", DEFAULT_COINBASE_API_URL),
            })
        } else {
            None
        };

        let solana = if vars.flag("SOLANA_ENABLED")? {
            Some(SolanaConfig {
                rpc_url: vars.or("SOLANA_RPC_URL", DEFAULT_SOLANA_RPC_URL),
                master_key_file: vars.or("SOLANA_MASTER_KEY_FILE", DEFAULT_MASTER_KEY_FILE),
                usdc_mint: vars.or("SOLANA_USDC_MINT", USDC_MINT),
            })
        } else {
            None
        };

        let config = Self {
            port,
            db_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            terms_url,
            context_token_secret,
            context_token_ttl_secs: vars
                .parsed("CONTEXT_TOKEN_TTL_SECS", DEFAULT_CONTEXT_TOKEN_TTL_SECS)?,
            min_charge_hold_secs: vars
                .parsed("MIN_CHARGE_HOLD_SECS", DEFAULT_MIN_CHARGE_HOLD_SECS)?,
            price_cache_ttl_secs: vars
                .parsed("PRICE_CACHE_TTL_SECS", DEFAULT_PRICE_CACHE_TTL_SECS)?,
            solana_poll_interval_secs: vars
                .parsed("SOLANA_POLL_INTERVAL_SECS", DEFAULT_SOLANA_POLL_INTERVAL_SECS)?,
            solana_payment_timeout_secs: vars
                .parsed("SOLANA_PAYMENT_TIMEOUT_SECS", DEFAULT_SOLANA_PAYMENT_TIMEOUT_SECS)?,
            accept_late_settlements: vars.flag_or("ACCEPT_LATE_SETTLEMENTS", true)?,
            expiry_sweep_interval_secs: vars
                .parsed("EXPIRY_SWEEP_INTERVAL_SECS", DEFAULT_EXPIRY_SWEEP_INTERVAL_SECS)?,
            rate_limit_rpm: vars.parsed("RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?,
            allowed_origins,
            metrics_token,
            quote_api_url: vars.or("QUOTE_API_URL", DEFAULT_QUOTE_API_URL),
            quote_cache_ttl_secs: vars.parsed("QUOTE_CACHE_TTL_SECS", DEFAULT_QUOTE_CACHE_TTL_SECS)?,
            stripe,
            lightning,
            coinbase,
            solana,
        };

        if config.enabled_rails().is_empty() {
            tracing::warn!("no payment rails enabled; challenges will list no offers");
        }
        Ok(config)
    }

    /// Rails switched on by configuration.
    pub fn enabled_rails(&self) -> Vec<Rail> {
        let mut rails = Vec::new();
        if self.stripe.is_some() {
            rails.push(Rail::Stripe);
        }
        if self.lightning.is_some() {
            rails.push(Rail::Lightning);
        }
        if self.coinbase.is_some() {
            rails.push(Rail::Coinbase);
        }
        if self.solana.is_some() {
            rails.push(Rail::Solana);
        }
        rails
    }

    pub fn payment_request_url(&self) -> String {
        format!("{}/l402/payment-request", self.public_base_url)
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    /// Non-empty value of `key`.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::MissingRequired(key))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }

    fn flag_or(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).as_deref() {
            None => Ok(default),
            Some("1") | Some("true") | Some("yes") => Ok(true),
            Some("0") | Some("false") | Some("no") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                key,
                value: other.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        self.flag_or(key, false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 5001);
        assert_eq!(config.db_path, "./l402.db");
        assert_eq!(config.min_charge_hold_secs, 1800);
        assert_eq!(config.price_cache_ttl_secs, 600);
        assert_eq!(config.solana_poll_interval_secs, 10);
        assert!(config.accept_late_settlements);
        assert_eq!(config.context_token_secret.len(), 32);
        assert!(config.enabled_rails().is_empty());
        assert_eq!(
            config.payment_request_url(),
            "http://localhost:5001/l402/payment-request"
        );
    }

    #[test]
    fn test_enabled_rail_requires_credentials() {
        let err = load(&[("STRIPE_ENABLED", "true"), ("STRIPE_SECRET_KEY", "sk_test")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("STRIPE_WEBHOOK_SECRET")));

        let err = load(&[("LIGHTNING_ENABLED", "1")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
    }

    #[test]
    fn test_rails_enabled_with_credentials() {
        let config = load(&[
            ("STRIPE_ENABLED", "true"),
            ("STRIPE_SECRET_KEY", "sk_test"),
            ("STRIPE_WEBHOOK_SECRET", "whsec"),
            ("SOLANA_ENABLED", "true"),
        ])
        .unwrap();
        assert_eq!(config.enabled_rails(), vec![Rail::Stripe, Rail::Solana]);
        assert_eq!(
            config.solana.as_ref().unwrap().usdc_mint,
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("PORT", "not-a-port")]),
            Err(ConfigError::Invalid { key: "PORT", .. })
        ));
        assert!(matches!(
            load(&[("ACCEPT_LATE_SETTLEMENTS", "maybe")]),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            load(&[("PUBLIC_BASE_URL", "not a url")]),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&[
            ("CONTEXT_TOKEN_SECRET", "super-secret-context-token-value!"),
            ("METRICS_TOKEN", "metrics-secret"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("metrics-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
