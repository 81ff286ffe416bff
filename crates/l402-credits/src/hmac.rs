use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `body` with the shared secret, hex-encoded.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    hex::encode(compute_hmac_raw(secret, body))
}

/// Compute HMAC-SHA256 over `body`, returning the raw 32-byte MAC.
pub fn compute_hmac_raw(secret: &[u8], body: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// Verify a hex HMAC-SHA256 signature over `body`.
///
/// Comparison is constant-time. A signature that is not valid hex is compared
/// against zeros so malformed input takes the same path as a wrong MAC.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);

    let expected = hex::decode(signature.trim()).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}
