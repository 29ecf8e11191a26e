//! Request signing for the venue's API-key authentication.

use hmac::{Hmac, Mac};
use rand::Rng;
use serde_json::json;
use sha2::Sha256;

use super::protocol;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Credentials {
    pub user_id: String,
    pub api_key: String,
    pub secret: String,
}

// The secret must never reach the logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

fn sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `(signature, nonce)` over the venue's `{nonce}{user_id}{api_key}` scheme.
pub fn signature(credentials: &Credentials) -> (String, u32) {
    let nonce: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    let message = format!("{nonce}{}{}", credentials.user_id, credentials.api_key);
    (sign(&credentials.secret, &message), nonce)
}

pub fn authenticate_user_request(credentials: &Credentials) -> String {
    let (signature, nonce) = signature(credentials);
    protocol::request(
        "AuthenticateUser",
        json!({
            "APIKey": credentials.api_key,
            "Signature": signature,
            "UserId": credentials.user_id,
            "Nonce": nonce.to_string(),
        }),
    )
}

pub fn authenticate_2fa_request(code: &str) -> String {
    protocol::request("Authenticate2FA", json!({"code": code}))
}
