use actix_web::{test, web, App};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use l402::provider::{ChargeRequest, CreatedCharge};
use l402::webhook::stripe::{signature_header_value, StripeWebhook};
use l402::{
    ChargeDescriptor, ChargeProvider, CreditLedger, L402Error, LedgerPolicy, PaymentRequest,
    PaymentStatus, PriceOracle, ProviderRegistry, Rail, RateSource, SettlementEvent,
    SqliteLedgerStore, WebhookVerifier,
};
use l402_server::market::{MarketError, Quote, QuoteSource};
use l402_server::metrics::register_metrics;
use l402_server::{routes, AppState, ServerConfig};

const WEBHOOK_SECRET: &[u8] = b"whsec_integration";
const BIG_OFFER: &str = "offer_a896b13c";

struct FakeStripe;

#[async_trait]
impl ChargeProvider for FakeStripe {
    fn rail(&self) -> Rail {
        Rail::Stripe
    }

    async fn create_charge(&self, charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        Ok(CreatedCharge {
            correlation_id: charge.request_id.to_string(),
            descriptor: ChargeDescriptor::Stripe {
                checkout_url: format!("https://checkout.test/{}", charge.request_id),
            },
        })
    }
}

/// Coinbase adapter whose remote API is always down.
struct DownCoinbase;

#[async_trait]
impl ChargeProvider for DownCoinbase {
    fn rail(&self) -> Rail {
        Rail::Coinbase
    }

    async fn create_charge(&self, _charge: &ChargeRequest<'_>) -> Result<CreatedCharge, L402Error> {
        Err(L402Error::provider(Rail::Coinbase, "HTTP 503"))
    }
}

#[derive(Default)]
struct FakeQuotes {
    calls: AtomicUsize,
}

#[async_trait]
impl QuoteSource for FakeQuotes {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, MarketError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match symbol {
            "DOWN" => Err(MarketError::Upstream("connection refused".to_string())),
            "AAPL" => Ok(Some(Quote {
                symbol: "AAPL".to_string(),
                name: Some("Apple Inc.".to_string()),
                currency: "USD".to_string(),
                exchange: None,
                current_price: 227.52,
                previous_close: Some(225.0),
                day_high: None,
                day_low: None,
                fifty_two_week_high: None,
                fifty_two_week_low: None,
                volume: None,
                market_time: None,
            })),
            _ => Ok(None),
        }
    }
}

struct Harness {
    state: web::Data<AppState>,
    quotes: Arc<FakeQuotes>,
}

fn harness_with(vars: &[(&str, &str)]) -> Harness {
    register_metrics();
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = ServerConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

    let store = Arc::new(SqliteLedgerStore::open(":memory:").unwrap());
    let ledger = CreditLedger::new(store, LedgerPolicy::default());
    let providers = ProviderRegistry::new()
        .with(Arc::new(FakeStripe))
        .with(Arc::new(DownCoinbase));
    let mut webhooks: HashMap<Rail, Arc<dyn WebhookVerifier>> = HashMap::new();
    webhooks.insert(Rail::Stripe, Arc::new(StripeWebhook::new(WEBHOOK_SECRET)));

    let quotes = Arc::new(FakeQuotes::default());
    let state = AppState::new(config, ledger, providers, webhooks, quotes.clone());
    Harness {
        state: web::Data::new(state),
        quotes,
    }
}

fn harness() -> Harness {
    harness_with(&[("CONTEXT_TOKEN_SECRET", "integration-context-secret-0123456789")])
}

/// Settle a synthetic purchase so the user has `credits` to spend.
fn grant(state: &AppState, user_id: &str, credits: i64) {
    let now = chrono::Utc::now().timestamp();
    let id = format!("grant-{user_id}-{credits}");
    state
        .store
        .insert_payment_request(&PaymentRequest {
            id: id.clone(),
            user_id: user_id.to_string(),
            offer_id: BIG_OFFER.to_string(),
            rail: Rail::Stripe,
            status: PaymentStatus::Pending,
            amount: 499,
            currency: "USD".to_string(),
            credits,
            created_at: now,
            expires_at: now + 1800,
            completed_at: None,
        })
        .unwrap();
    state.ledger.settle(&SettlementEvent::new(id)).unwrap();
}

fn stripe_event(request_id: &str) -> Vec<u8> {
    serde_json::json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "client_reference_id": request_id,
            "payment_status": "paid",
            "amount_total": 499,
            "currency": "usd",
            "metadata": { "request_id": request_id }
        }}
    })
    .to_string()
    .into_bytes()
}

fn signed(body: &[u8]) -> String {
    signature_header_value(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), body)
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data($h.state.clone())
                .configure(routes::configure),
        )
        .await
    };
}

macro_rules! signup {
    ($app:expr) => {{
        let resp = test::call_service(
            &$app,
            test::TestRequest::post().uri("/signup").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        body["id"].as_str().unwrap().to_string()
    }};
}

#[actix_rt::test]
async fn test_health_lists_enabled_rails() {
    let h = harness();
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["enabled_rails"], serde_json::json!(["stripe", "coinbase"]));
}

#[actix_rt::test]
async fn test_signup_and_info() {
    let h = harness();
    let app = app!(h);

    let user_id = signup!(app);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/info")
            .insert_header(("Authorization", format!("Bearer {user_id}")))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], user_id.as_str());
    assert_eq!(body["credits"], 0);
    assert_eq!(body["payments"], serde_json::json!([]));

    let resp = test::call_service(&app, test::TestRequest::get().uri("/info").to_request()).await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/info")
            .insert_header(("Authorization", "Bearer nobody"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_ticker_without_credit_returns_challenge() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/ticker/AAPL")
            .insert_header(("Authorization", format!("Bearer {user_id}")))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 402);

    let challenge: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(challenge["version"], "1.0");
    assert_eq!(
        challenge["payment_request_url"],
        "http://localhost:5001/l402/payment-request"
    );
    assert!(!challenge["payment_context_token"].as_str().unwrap().is_empty());
    assert_eq!(challenge["metadata"]["user_id"], user_id.as_str());

    let offers = challenge["offers"].as_array().unwrap();
    assert_eq!(offers.len(), 3);
    let big = offers.iter().find(|o| o["id"] == BIG_OFFER).unwrap();
    assert_eq!(big["payment_methods"], serde_json::json!(["coinbase", "stripe"]));

    // No upstream call when the caller cannot pay.
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn test_purchase_settle_and_spend() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);
    let bearer = format!("Bearer {user_id}");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/l402/payment-request")
            .insert_header(("Authorization", bearer.as_str()))
            .set_json(serde_json::json!({
                "offer_id": BIG_OFFER,
                "payment_method": "stripe"
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let created: serde_json::Value = test::read_body_json(resp).await;
    let request_id = created["payment_request"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["payment_request"]["payment_method"], "stripe");
    assert_eq!(created["payment_request"]["credits"], 600);
    assert!(created["payment_request"]["checkout_url"]
        .as_str()
        .unwrap()
        .ends_with(&request_id));
    assert!(created["expires_at"].as_str().is_some());

    // The provider retries; both deliveries are acknowledged, one settles.
    let body = stripe_event(&request_id);
    for _ in 0..2 {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook/stripe")
                .insert_header(("Stripe-Signature", signed(&body)))
                .insert_header(("Content-Type", "application/json"))
                .set_payload(body.clone())
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 200);
        let ack: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(ack["received"], true);
    }

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/info")
            .insert_header(("Authorization", bearer.as_str()))
            .to_request(),
    )
    .await;
    let info: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(info["credits"], 600);
    assert_eq!(info["payments"].as_array().unwrap().len(), 1);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/ticker/aapl")
            .insert_header(("Authorization", bearer.as_str()))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let quote: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(quote["symbol"], "AAPL");
    assert_eq!(quote["data"]["current_price"], 227.52);
    assert_eq!(quote["credits_remaining"], 599);
}

#[actix_rt::test]
async fn test_context_token_identifies_payer() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);

    let challenge = h.state.challenge_for(&user_id);
    let token = challenge.payment_context_token.clone();

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/l402/payment-request")
            .set_json(serde_json::json!({
                "offer_id": BIG_OFFER,
                "payment_method": "stripe",
                "payment_context_token": token
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let mut forged = token.clone();
    forged.push('0');
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/l402/payment-request")
            .set_json(serde_json::json!({
                "offer_id": BIG_OFFER,
                "payment_method": "stripe",
                "payment_context_token": forged
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/l402/payment-request")
            .set_json(serde_json::json!({
                "offer_id": BIG_OFFER,
                "payment_method": "stripe"
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 401);
}

#[actix_rt::test]
async fn test_payment_request_rejections() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);
    let bearer = format!("Bearer {user_id}");

    let cases = [
        (serde_json::json!({"offer_id": BIG_OFFER, "payment_method": "paypal"}), 400),
        (serde_json::json!({"offer_id": BIG_OFFER, "payment_method": "lightning"}), 400),
        (serde_json::json!({"offer_id": "offer_97bf23f7", "payment_method": "stripe"}), 400),
        (serde_json::json!({"offer_id": "offer_nope", "payment_method": "stripe"}), 400),
        (serde_json::json!({"payment_method": "stripe"}), 400),
        (serde_json::json!({"offer_id": BIG_OFFER, "payment_method": "coinbase"}), 500),
    ];

    for (body, status) in cases {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/l402/payment-request")
                .insert_header(("Authorization", bearer.as_str()))
                .set_json(&body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), status, "body: {body}");
        let err: serde_json::Value = test::read_body_json(resp).await;
        let expected = if status == 400 {
            "validation_error"
        } else {
            "provider_error"
        };
        assert_eq!(err["error"], expected, "body: {body}");
    }
}

#[actix_rt::test]
async fn test_webhook_rejections_never_credit() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/l402/payment-request")
            .insert_header(("Authorization", format!("Bearer {user_id}")))
            .set_json(serde_json::json!({"offer_id": BIG_OFFER, "payment_method": "stripe"}))
            .to_request(),
    )
    .await;
    let created: serde_json::Value = test::read_body_json(resp).await;
    let request_id = created["payment_request"]["id"].as_str().unwrap().to_string();
    let body = stripe_event(&request_id);

    // Forged and missing signatures are acknowledged but change nothing.
    let forged = signature_header_value(b"wrong-secret", chrono::Utc::now().timestamp(), &body);
    for header in [Some(forged), None] {
        let mut req = test::TestRequest::post()
            .uri("/webhook/stripe")
            .set_payload(body.clone());
        if let Some(value) = header {
            req = req.insert_header(("Stripe-Signature", value));
        }
        let resp = test::call_service(&app, req.to_request()).await;
        assert_eq!(resp.status(), 200);
    }
    let user = h.state.store.get_user(&user_id).unwrap().unwrap();
    assert_eq!(user.credits, 0);
    assert_eq!(
        h.state
            .store
            .get_payment_request(&request_id)
            .unwrap()
            .unwrap()
            .status,
        PaymentStatus::Pending
    );

    // Authenticated garbage is the only 400.
    let garbage = b"not json".to_vec();
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/webhook/stripe")
            .insert_header(("Stripe-Signature", signed(&garbage)))
            .set_payload(garbage)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 400);

    for uri in ["/webhook/lightning", "/webhook/paypal"] {
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri(uri)
                .set_payload(body.clone())
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404, "{uri}");
    }
}

#[actix_rt::test]
async fn test_failed_lookups_are_free() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);
    grant(&h.state, &user_id, 5);
    let bearer = format!("Bearer {user_id}");

    for (uri, status) in [
        ("/ticker/ZZZZ", 400),
        ("/ticker/DOWN", 502),
        ("/ticker/A;B", 400),
    ] {
        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(uri)
                .insert_header(("Authorization", bearer.as_str()))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), status, "{uri}");
    }

    let user = h.state.store.get_user(&user_id).unwrap().unwrap();
    assert_eq!(user.credits, 5);
    assert_eq!(user.credits_consumed, 0);
}

#[actix_rt::test]
async fn test_last_credit_then_challenge() {
    let h = harness();
    let app = app!(h);
    let user_id = signup!(app);
    grant(&h.state, &user_id, 1);
    let bearer = format!("Bearer {user_id}");

    let statuses: Vec<u16> = {
        let mut out = Vec::new();
        for _ in 0..2 {
            let resp = test::call_service(
                &app,
                test::TestRequest::get()
                    .uri("/ticker/AAPL")
                    .insert_header(("Authorization", bearer.as_str()))
                    .to_request(),
            )
            .await;
            out.push(resp.status().as_u16());
        }
        out
    };
    assert_eq!(statuses, vec![200, 402]);
    assert_eq!(h.state.store.get_user(&user_id).unwrap().unwrap().credits, 0);
}

#[actix_rt::test]
async fn test_metrics_requires_token_when_configured() {
    let h = harness_with(&[("METRICS_TOKEN", "scrape-me")]);
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/metrics")
            .insert_header(("Authorization", "Bearer scrape-me"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
}

/// Rate feed that answers once and then goes down.
struct FlakyRate(AtomicUsize);

#[async_trait]
impl RateSource for FlakyRate {
    async fn fetch_btc_usd(&self) -> Result<f64, L402Error> {
        if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(50_000.0)
        } else {
            Err(L402Error::PriceUnavailable("feed down".to_string()))
        }
    }
}

#[actix_rt::test]
async fn test_metrics_report_stale_price_serves() {
    let mut h = harness();
    let oracle = Arc::new(PriceOracle::new(
        Box::new(FlakyRate(AtomicUsize::new(0))),
        Duration::ZERO,
    ));
    let mut state = (**h.state).clone();
    state.oracle = Some(oracle.clone());
    h.state = web::Data::new(state);
    let app = app!(h);

    oracle.cents_to_sats(99).await.unwrap();
    oracle.cents_to_sats(99).await.unwrap();
    assert_eq!(oracle.stale_serves(), 1);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("l402_price_stale_serves 1"), "{body}");
}
