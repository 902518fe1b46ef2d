//! HMAC-SHA256 request signing.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, payload: &str) -> Vec<u8> {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Lowercase hex digest, as Binance expects in the `signature` parameter.
pub fn sign_hex(secret: &str, payload: &str) -> String {
    hex::encode(mac(secret, payload))
}

/// Base64 digest, as Bitget expects in the `ACCESS-SIGN` header.
pub fn sign_base64(secret: &str, payload: &str) -> String {
    STANDARD.encode(mac(secret, payload))
}
