//! Short-lived admin token: an HS256 JWT signed with the hex secret of an
//! `id:secret` admin key, valid for five minutes.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use super::SourceError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_TTL_SECS: i64 = 5 * 60;
const AUDIENCE: &str = "/admin/";

pub fn admin_token(admin_api_key: &str, issued_at: i64) -> Result<String, SourceError> {
    let (kid, secret) = admin_api_key
        .split_once(':')
        .ok_or_else(|| SourceError::Auth("admin key must be `id:secret`".to_string()))?;
    let secret =
        hex::decode(secret).map_err(|err| SourceError::Auth(format!("secret is not hex: {err}")))?;

    let header = json!({ "alg": "HS256", "typ": "JWT", "kid": kid });
    let payload = json!({
        "iat": issued_at,
        "exp": issued_at + TOKEN_TTL_SECS,
        "aud": AUDIENCE,
    });

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    );

    let mut mac = HmacSha256::new_from_slice(&secret)
        .map_err(|err| SourceError::Auth(err.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}
