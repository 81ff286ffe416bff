//! Market data behind the paid `/ticker` endpoint.
//!
//! Quotes come from Yahoo Finance's chart API and are cached per symbol for a
//! short TTL so a burst of paid calls does not hammer the upstream.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    pub current_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_high: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fifty_two_week_low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u64>,
    /// Unix seconds of the last trade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_time: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("quote request failed: {0}")]
    Upstream(String),
}

/// A source of quotes. `Ok(None)` means the symbol is unknown.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, MarketError>;
}

/// Uppercase and check a ticker symbol (`AAPL`, `BRK-B`, `^GSPC`, `EURUSD=X`).
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 15
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    valid.then_some(symbol)
}

pub struct YahooQuotes {
    client: reqwest::Client,
    base_url: String,
}

impl YahooQuotes {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for YahooQuotes {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, MarketError> {
        let url = format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        );
        let resp = self
            .client
            .get(&url)
            .query(&[("range", "1d"), ("interval", "1d")])
            .header(reqwest::header::USER_AGENT, "l402-credits-server")
            .send()
            .await
            .map_err(|e| MarketError::Upstream(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(MarketError::Upstream(format!("HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MarketError::Upstream(e.to_string()))?;
        parse_chart(&body)
    }
}

/// Extract a [`Quote`] from a `/v8/finance/chart` response.
pub fn parse_chart(body: &serde_json::Value) -> Result<Option<Quote>, MarketError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| MarketError::Upstream("response has no chart".to_string()))?;

    if let Some(code) = chart.pointer("/error/code").and_then(|c| c.as_str()) {
        if code == "Not Found" {
            return Ok(None);
        }
        return Err(MarketError::Upstream(format!("chart error: {code}")));
    }

    let Some(meta) = chart.pointer("/result/0/meta") else {
        return Ok(None);
    };
    let Some(current_price) = meta.get("regularMarketPrice").and_then(|v| v.as_f64()) else {
        return Ok(None);
    };

    let f = |key: &str| meta.get(key).and_then(|v| v.as_f64());
    let s = |key: &str| meta.get(key).and_then(|v| v.as_str()).map(str::to_string);

    Ok(Some(Quote {
        symbol: s("symbol").unwrap_or_default(),
        name: s("longName").or_else(|| s("shortName")),
        currency: s("currency").unwrap_or_else(|| "USD".to_string()),
        exchange: s("fullExchangeName").or_else(|| s("exchangeName")),
        current_price,
        previous_close: f("previousClose").or_else(|| f("chartPreviousClose")),
        day_high: f("regularMarketDayHigh"),
        day_low: f("regularMarketDayLow"),
        fifty_two_week_high: f("fiftyTwoWeekHigh"),
        fifty_two_week_low: f("fiftyTwoWeekLow"),
        volume: meta.get("regularMarketVolume").and_then(|v| v.as_u64()),
        market_time: meta.get("regularMarketTime").and_then(|v| v.as_i64()),
    }))
}

/// TTL cache in front of another [`QuoteSource`]. Unknown symbols and errors
/// are not cached.
pub struct CachedQuotes<S> {
    source: S,
    ttl: Duration,
    cache: DashMap<String, (Instant, Quote)>,
}

impl<S: QuoteSource> CachedQuotes<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl<S: QuoteSource> QuoteSource for CachedQuotes<S> {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, MarketError> {
        if let Some(entry) = self.cache.get(symbol) {
            let (fetched_at, quote) = entry.value();
            if fetched_at.elapsed() < self.ttl {
                return Ok(Some(quote.clone()));
            }
        }

        let quote = self.source.quote(symbol).await?;
        if let Some(ref q) = quote {
            self.cache
                .insert(symbol.to_string(), (Instant::now(), q.clone()));
        }
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_chart() -> serde_json::Value {
        serde_json::json!({
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "USD",
                        "symbol": "AAPL",
                        "exchangeName": "NMS",
                        "fullExchangeName": "NasdaqGS",
                        "regularMarketPrice": 227.52,
                        "chartPreviousClose": 225.0,
                        "regularMarketDayHigh": 228.1,
                        "regularMarketDayLow": 224.9,
                        "regularMarketVolume": 41000000u64,
                        "regularMarketTime": 1760558400,
                        "longName": "Apple Inc."
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_parse_chart() {
        let quote = parse_chart(&sample_chart()).unwrap().unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name.as_deref(), Some("Apple Inc."));
        assert_eq!(quote.exchange.as_deref(), Some("NasdaqGS"));
        assert_eq!(quote.current_price, 227.52);
        assert_eq!(quote.previous_close, Some(225.0));
        assert_eq!(quote.volume, Some(41_000_000));
    }

    #[test]
    fn test_parse_chart_not_found() {
        let body = serde_json::json!({
            "chart": {
                "result": null,
                "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}
            }
        });
        assert_eq!(parse_chart(&body).unwrap(), None);
    }

    #[test]
    fn test_parse_chart_garbage() {
        assert!(parse_chart(&serde_json::json!({"foo": 1})).is_err());
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("aapl").as_deref(), Some("AAPL"));
        assert_eq!(normalize_symbol("BRK-B").as_deref(), Some("BRK-B"));
        assert_eq!(normalize_symbol("^gspc").as_deref(), Some("^GSPC"));
        assert_eq!(normalize_symbol(""), None);
        assert_eq!(normalize_symbol("AAPL;DROP"), None);
        assert_eq!(normalize_symbol("../etc"), None);
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl QuoteSource for Counting {
        async fn quote(&self, symbol: &str) -> Result<Option<Quote>, MarketError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if symbol == "NONE" {
                return Ok(None);
            }
            Ok(parse_chart(&sample_chart()).unwrap())
        }
    }

    #[tokio::test]
    async fn test_cache_serves_fresh_quotes() {
        let cached = CachedQuotes::new(Counting(AtomicUsize::new(0)), Duration::from_secs(60));
        cached.quote("AAPL").await.unwrap();
        cached.quote("AAPL").await.unwrap();
        assert_eq!(cached.source.0.load(Ordering::SeqCst), 1);

        // Unknown symbols go upstream every time.
        cached.quote("NONE").await.unwrap();
        cached.quote("NONE").await.unwrap();
        assert_eq!(cached.source.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let cached = CachedQuotes::new(Counting(AtomicUsize::new(0)), Duration::ZERO);
        cached.quote("AAPL").await.unwrap();
        cached.quote("AAPL").await.unwrap();
        assert_eq!(cached.source.0.load(Ordering::SeqCst), 2);
    }
}
