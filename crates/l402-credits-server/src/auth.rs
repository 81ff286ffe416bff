//! Bearer-token identification. The user id doubles as the API token.

use actix_web::HttpRequest;
use l402::{L402Error, User};

use crate::state::AppState;

/// The token from `Authorization: Bearer <token>`, if present.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to a user or fail with `Auth`.
pub fn require_user(req: &HttpRequest, state: &AppState) -> Result<User, L402Error> {
    let token = bearer_token(req)
        .ok_or_else(|| L402Error::Auth("missing bearer token".to_string()))?;
    lookup_user(state, token)
}

pub fn lookup_user(state: &AppState, user_id: &str) -> Result<User, L402Error> {
    state
        .store
        .get_user(user_id)?
        .ok_or_else(|| L402Error::Auth("unknown user".to_string()))
}
