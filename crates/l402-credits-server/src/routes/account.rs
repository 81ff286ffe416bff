use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::require_user;
use crate::error::ServerError;
use crate::metrics::USERS_CREATED;
use crate::state::AppState;

/// GET|POST /signup - Create a user with a zero balance.
///
/// The returned `id` is the caller's bearer token from now on.
pub async fn signup(state: web::Data<AppState>) -> Result<HttpResponse, ServerError> {
    let user = state.store.create_user()?;
    USERS_CREATED.inc();
    tracing::info!(user_id = %user.id, "user created");
    Ok(HttpResponse::Ok().json(user))
}

/// GET /info - The authenticated user's balance and settled payments.
pub async fn info(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user = require_user(&req, &state)?;
    let payments = state.store.payments_for_user(&user.id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": user.id,
        "credits": user.credits,
        "credits_consumed": user.credits_consumed,
        "created_at": user.created_at,
        "payments": payments,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/signup", web::get().to(signup))
        .route("/signup", web::post().to(signup))
        .route("/info", web::get().to(info));
}
