//! Payment context tokens.
//!
//! A token identifies the requester between the 402 challenge and the
//! purchase call: `base64url(user_id:expiry).hex_hmac`. The MAC covers the
//! encoded part, so the token is verified before it is decoded.

use base64::Engine;

use crate::error::L402Error;
use crate::hmac::{compute_hmac, verify_hmac};

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Issue a token for `user_id` valid until `expires_at` (unix seconds).
pub fn issue(secret: &[u8], user_id: &str, expires_at: i64) -> String {
    let encoded = ENGINE.encode(format!("{user_id}:{expires_at}"));
    let mac = compute_hmac(secret, encoded.as_bytes());
    format!("{encoded}.{mac}")
}

/// Verify a token and return the user id it names.
pub fn verify(secret: &[u8], token: &str, now: i64) -> Result<String, L402Error> {
    let (encoded, mac) = token
        .split_once('.')
        .ok_or_else(|| L402Error::Auth("malformed payment context token".to_string()))?;

    if !verify_hmac(secret, encoded.as_bytes(), mac) {
        return Err(L402Error::Auth("invalid payment context token".to_string()));
    }

    let decoded = ENGINE
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| L402Error::Auth("malformed payment context token".to_string()))?;

    // User ids never contain ':'; split from the right anyway.
    let (user_id, expires_at) = decoded
        .rsplit_once(':')
        .and_then(|(u, e)| e.parse::<i64>().ok().map(|e| (u, e)))
        .ok_or_else(|| L402Error::Auth("malformed payment context token".to_string()))?;

    if now > expires_at {
        return Err(L402Error::Auth("payment context token expired".to_string()));
    }
    Ok(user_id.to_string())
}
