//! Fiat → satoshi conversion backed by a cached BTC/USD rate.
//!
//! The cached rate is shared by every request task. Refreshes are serialized
//! behind an async mutex, so a burst of conversions arriving after the TTL
//! lapses produces a single upstream call.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::L402Error;

pub const DEFAULT_PRICE_FEED_URL: &str = "https://api.kraken.com/0/public/Ticker?pair=XBTUSD";
// 1 USD cent = 10^-2 USD and 1 BTC = 10^8 sats.
const SATS_PER_CENT_AT_1_USD: f64 = 1_000_000.0;

/// Upstream source of the BTC price in USD.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_btc_usd(&self) -> Result<f64, L402Error>;
}

/// Kraken public ticker (last trade price).
pub struct KrakenRateSource {
    client: reqwest::Client,
    url: String,
}

impl KrakenRateSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RateSource for KrakenRateSource {
    async fn fetch_btc_usd(&self) -> Result<f64, L402Error> {
        let body: serde_json::Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| L402Error::PriceUnavailable(format!("price feed request failed: {e}")))?
            .json()
            .await
            .map_err(|e| L402Error::PriceUnavailable(format!("price feed body: {e}")))?;

        parse_kraken_ticker(&body)
    }
}

/// Extract the last trade price from a Kraken ticker response.
///
/// Kraken keys the result by its internal pair name (`XXBTZUSD`), so the
/// first entry is taken rather than a fixed key.
pub fn parse_kraken_ticker(body: &serde_json::Value) -> Result<f64, L402Error> {
    if let Some(errors) = body["error"].as_array() {
        if !errors.is_empty() {
            return Err(L402Error::PriceUnavailable(format!(
                "price feed error: {errors:?}"
            )));
        }
    }

    let price = body["result"]
        .as_object()
        .and_then(|pairs| pairs.values().next())
        .and_then(|pair| pair["c"][0].as_str())
        .and_then(|p| p.parse::<f64>().ok())
        .ok_or_else(|| L402Error::PriceUnavailable("unexpected price feed format".to_string()))?;

    if !price.is_finite() || price <= 0.0 {
        return Err(L402Error::PriceUnavailable(format!(
            "implausible BTC price {price}"
        )));
    }
    Ok(price)
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    btc_usd: f64,
    fetched_at: Instant,
}

/// Cached BTC/USD rate with a fixed time-to-live.
pub struct PriceOracle {
    source: Box<dyn RateSource>,
    ttl: Duration,
    cache: Mutex<Option<CachedRate>>,
    stale_serves: AtomicU64,
}

impl PriceOracle {
    pub fn new(source: Box<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(None),
            stale_serves: AtomicU64::new(0),
        }
    }

    /// Current BTC price in USD, refreshing it if the cache is past its TTL.
    ///
    /// If the refresh fails and a rate was fetched before, the last known rate
    /// is returned and the failure is logged. With no rate ever fetched the
    /// conversion fails.
    pub async fn btc_usd(&self) -> Result<f64, L402Error> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = *cache {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.btc_usd);
            }
        }

        match self.source.fetch_btc_usd().await {
            Ok(btc_usd) => {
                *cache = Some(CachedRate {
                    btc_usd,
                    fetched_at: Instant::now(),
                });
                tracing::info!(btc_usd, "updated BTC price cache");
                Ok(btc_usd)
            }
            Err(e) => match *cache {
                Some(stale) => {
                    self.stale_serves.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        error = %e,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        "BTC price refresh failed; using last known rate"
                    );
                    Ok(stale.btc_usd)
                }
                None => {
                    tracing::error!(error = %e, "BTC price unavailable and no cached rate");
                    Err(e)
                }
            },
        }
    }

    /// Convert US cents to whole satoshis, rounding up.
    pub async fn cents_to_sats(&self, cents: i64) -> Result<u64, L402Error> {
        if cents < 0 {
            return Err(L402Error::Validation("negative amount".to_string()));
        }
        let btc_usd = self.btc_usd().await?;
        Ok(cents_to_sats_at(cents, btc_usd))
    }

    /// Number of conversions answered from a stale rate after a failed refresh.
    pub fn stale_serves(&self) -> u64 {
        self.stale_serves.load(Ordering::Relaxed)
    }
}

fn cents_to_sats_at(cents: i64, btc_usd: f64) -> u64 {
    let sats = (cents as f64 * SATS_PER_CENT_AT_1_USD) / btc_usd;
    sats.ceil() as u64
}
