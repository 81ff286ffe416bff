use actix_web::{web, HttpRequest, HttpResponse};
use l402::L402Error;

use crate::auth::require_user;
use crate::error::ServerError;
use crate::market::normalize_symbol;
use crate::metrics::{CREDITS_CONSUMED, QUOTE_FAILURES};
use crate::state::AppState;

/// Credits charged per successful quote.
const QUOTE_COST: i64 = 1;

/// GET /ticker/{symbol} - Paid market data.
///
/// The credit is only taken once the quote is in hand; a failed lookup is free.
pub async fn ticker(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let user = require_user(&req, &state)?;
    let raw = path.into_inner();
    let symbol = normalize_symbol(&raw)
        .ok_or_else(|| L402Error::Validation(format!("invalid ticker symbol: {raw}")))?;

    if user.credits < QUOTE_COST {
        return Err(state.payment_required(&user.id));
    }

    let quote = match state.quotes.quote(&symbol).await {
        Ok(Some(quote)) => quote,
        Ok(None) => return Err(ServerError::UnknownSymbol(symbol)),
        Err(e) => {
            QUOTE_FAILURES.inc();
            return Err(ServerError::Upstream(e.to_string()));
        }
    };

    // A concurrent call may have drained the balance since the check above.
    let user = match state.ledger.consume(&user.id, QUOTE_COST) {
        Ok(user) => user,
        Err(L402Error::InsufficientCredits { .. }) => {
            return Err(state.payment_required(&user.id))
        }
        Err(e) => return Err(e.into()),
    };
    CREDITS_CONSUMED.inc_by(QUOTE_COST as u64);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "symbol": symbol,
        "data": quote,
        "credits_remaining": user.credits,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ticker/{symbol}", web::get().to(ticker));
}
