use actix_web::{web, HttpRequest, HttpResponse};
use l402::security::constant_time_eq;

use crate::auth::bearer_token;
use crate::metrics::{PRICE_STALE_SERVES, REGISTRY};
use crate::state::AppState;

/// GET /health - Health check endpoint
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let mut response = serde_json::json!({
        "status": "ok",
        "service": "l402-credits-server",
        "version": env!("CARGO_PKG_VERSION"),
        "enabled_rails": state.enabled_rails(),
    });

    if let Some(ref monitor) = state.monitor {
        response["watched_addresses"] = serde_json::json!(monitor.active_count());
    }

    HttpResponse::Ok().json(response)
}

/// GET /metrics - Prometheus metrics endpoint (optionally auth-gated)
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected_token) = state.config.metrics_token {
        let authorized = bearer_token(&req)
            .map(|token| constant_time_eq(token.as_bytes(), expected_token.as_bytes()))
            .unwrap_or(false);

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    use prometheus::Encoder;

    if let Some(ref oracle) = state.oracle {
        PRICE_STALE_SERVES.set(i64::try_from(oracle.stale_serves()).unwrap_or(i64::MAX));
    }

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().body("Failed to encode metrics");
    }

    let output = String::from_utf8(buffer).unwrap_or_default();
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(output)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
