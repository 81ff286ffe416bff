use actix_web::{web, HttpRequest, HttpResponse};
use l402::{process_webhook, Rail, WebhookOutcome};

use crate::error::ServerError;
use crate::metrics::{SETTLEMENTS_TOTAL, WEBHOOKS_TOTAL};
use crate::state::AppState;

/// POST /webhook/{rail} - Provider completion events.
///
/// The raw body is authenticated before it is parsed. Anything short of a
/// malformed payload is acknowledged with 200 so the provider stops
/// retrying; the outcome is logged and counted instead.
pub async fn receive(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let rail_name = path.into_inner();
    let verifier = rail_name
        .parse::<Rail>()
        .ok()
        .and_then(|rail| state.webhooks.get(&rail))
        .ok_or_else(|| ServerError::NotFound(format!("no webhook for {rail_name}")))?;
    let rail = verifier.rail();

    let signature = req
        .headers()
        .get(verifier.signature_header())
        .and_then(|v| v.to_str().ok());

    let outcome = process_webhook(verifier.as_ref(), &state.ledger, signature, &body).await;

    WEBHOOKS_TOTAL
        .with_label_values(&[rail.as_str(), outcome.label()])
        .inc();
    if let WebhookOutcome::Settled { .. } = outcome {
        SETTLEMENTS_TOTAL.with_label_values(&[rail.as_str()]).inc();
    }

    if outcome.is_malformed() {
        return Ok(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "malformed_payload",
            "message": "Webhook payload could not be parsed"
        })));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "received": true })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhook/{rail}", web::post().to(receive));
}
