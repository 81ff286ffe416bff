use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static PAYMENT_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "l402_payment_requests_total",
            "Payment requests by rail and outcome",
        ),
        &["rail", "outcome"],
    )
    .unwrap()
});

pub static WEBHOOKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("l402_webhooks_total", "Webhook deliveries by rail and outcome"),
        &["rail", "outcome"],
    )
    .unwrap()
});

pub static SETTLEMENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("l402_settlements_total", "Webhook settlements that granted credits"),
        &["rail"],
    )
    .unwrap()
});

pub static CHALLENGES_ISSUED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("l402_challenges_issued_total", "402 challenges returned").unwrap()
});

pub static CREDITS_CONSUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("l402_credits_consumed_total", "Credits spent on paid calls").unwrap()
});

pub static USERS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("l402_users_created_total", "Users created via signup").unwrap()
});

pub static REQUESTS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "l402_payment_requests_expired_total",
        "Pending payment requests expired by the sweep",
    )
    .unwrap()
});

pub static QUOTE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("l402_quote_failures_total", "Failed market data lookups").unwrap()
});

/// Copied from the price oracle when `/metrics` is scraped.
pub static PRICE_STALE_SERVES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "l402_price_stale_serves",
        "Sat conversions answered from the last known BTC rate after a failed refresh",
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Later calls are no-ops.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(PAYMENT_REQUESTS_TOTAL.clone()))
            .unwrap();
        REGISTRY.register(Box::new(WEBHOOKS_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(SETTLEMENTS_TOTAL.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(CHALLENGES_ISSUED.clone()))
            .unwrap();
        REGISTRY.register(Box::new(CREDITS_CONSUMED.clone())).unwrap();
        REGISTRY.register(Box::new(USERS_CREATED.clone())).unwrap();
        REGISTRY.register(Box::new(REQUESTS_EXPIRED.clone())).unwrap();
        REGISTRY.register(Box::new(QUOTE_FAILURES.clone())).unwrap();
        REGISTRY
            .register(Box::new(PRICE_STALE_SERVES.clone()))
            .unwrap();
    });
}
