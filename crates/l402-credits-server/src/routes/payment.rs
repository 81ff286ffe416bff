use actix_web::{error::JsonPayloadError, web, HttpRequest, HttpResponse};
use l402::{token, L402Error, RailParams};
use serde::Deserialize;

use crate::auth::{bearer_token, lookup_user};
use crate::error::ServerError;
use crate::metrics::PAYMENT_REQUESTS_TOTAL;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentRequestBody {
    pub offer_id: String,
    pub payment_method: String,
    /// Identifies the payer when no bearer token is sent.
    #[serde(default)]
    pub payment_context_token: Option<String>,
    /// Rail-specific parameters (`network`, `asset`).
    #[serde(flatten)]
    pub params: RailParams,
}

/// POST /l402/payment-request - Create a charge for one offer on one rail.
pub async fn create_payment_request(
    req: HttpRequest,
    body: web::Json<PaymentRequestBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let body = body.into_inner();

    let user = match (bearer_token(&req), body.payment_context_token.as_deref()) {
        (Some(bearer), _) => lookup_user(&state, bearer)?,
        (None, Some(context_token)) => {
            let user_id = token::verify(
                &state.challenge.token_secret,
                context_token,
                chrono::Utc::now().timestamp(),
            )?;
            lookup_user(&state, &user_id)?
        }
        (None, None) => {
            return Err(L402Error::Auth(
                "bearer token or payment_context_token required".to_string(),
            )
            .into())
        }
    };

    let result = state
        .orchestrator
        .create_payment_request(&user.id, &body.offer_id, &body.payment_method, &body.params)
        .await;

    let rail_label = body
        .payment_method
        .parse::<l402::Rail>()
        .map(|r| r.as_str())
        .unwrap_or("unknown");
    let outcome = match &result {
        Ok(_) => "created",
        Err(L402Error::Validation(_)) => "rejected",
        Err(_) => "failed",
    };
    PAYMENT_REQUESTS_TOTAL
        .with_label_values(&[rail_label, outcome])
        .inc();

    let created = result?;
    tracing::info!(
        user_id = %user.id,
        rail = rail_label,
        offer_id = %body.offer_id,
        payment_request_id = %created.payment_request.id,
        "payment request created"
    );
    Ok(HttpResponse::Ok().json(created))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ServerError::Core(L402Error::Validation(format!("invalid request body: {err}"))).into()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/l402/payment-request")
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .route(web::post().to(create_payment_request)),
    );
}
