use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use l402::{Challenge, L402Error};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] L402Error),

    /// No credit left; the body is the challenge itself.
    #[error("payment required")]
    PaymentRequired(Box<Challenge>),

    #[error("unable to fetch stock data for ticker {0}")]
    UnknownSymbol(String),

    /// Market data provider unreachable or returned garbage.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("not found: {0}")]
    NotFound(String),
}

fn body(error: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": error,
        "message": message.into(),
    })
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Core(e) => match e {
                L402Error::Validation(_) => StatusCode::BAD_REQUEST,
                L402Error::Auth(_) | L402Error::WebhookAuth(_) => StatusCode::UNAUTHORIZED,
                L402Error::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ServerError::UnknownSymbol(_) => StatusCode::BAD_REQUEST,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ServerError::PaymentRequired(challenge) => {
                HttpResponse::PaymentRequired().json(challenge.as_ref())
            }
            ServerError::UnknownSymbol(_) => {
                HttpResponse::BadRequest().json(body("unknown_symbol", self.to_string()))
            }
            ServerError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                HttpResponse::BadGateway().json(body(
                    "upstream_error",
                    "Failed to reach market data provider",
                ))
            }
            ServerError::NotFound(msg) => {
                HttpResponse::NotFound().json(body("not_found", msg.clone()))
            }
            ServerError::Core(e) => match e {
                L402Error::Validation(msg) => {
                    HttpResponse::BadRequest().json(body("validation_error", msg.clone()))
                }
                L402Error::Auth(msg) | L402Error::WebhookAuth(msg) => {
                    HttpResponse::Unauthorized().json(body("unauthorized", msg.clone()))
                }
                L402Error::InsufficientCredits { .. } => HttpResponse::PaymentRequired()
                    .json(body("insufficient_credits", e.to_string())),
                L402Error::Provider { rail, message } => {
                    tracing::error!(rail = %rail, "Provider error: {}", message);
                    HttpResponse::build(status).json(body(
                        "provider_error",
                        format!("Payment provider {rail} is unavailable"),
                    ))
                }
                L402Error::PriceUnavailable(msg) => {
                    tracing::error!("Price unavailable: {}", msg);
                    HttpResponse::build(status).json(body(
                        "provider_error",
                        "Exchange rate unavailable",
                    ))
                }
                other => {
                    tracing::error!("Internal error: {}", other);
                    HttpResponse::build(status)
                        .json(body("internal_error", "An internal error occurred"))
                }
            },
        }
    }
}
