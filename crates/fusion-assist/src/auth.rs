//! HS256 bearer-token verification.
//!
//! Tokens are issued by the account service; this module only verifies
//! them, plus [`TokenVerifier::sign`] for the `fusion token` dev command
//! and tests. Claims carry `user_id` and `exp` (Unix seconds). A
//! `token_type` claim, when present, must be `access`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use fusion_core::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

fn reject(reason: impl Into<String>) -> Error {
    Error::Authentication(reason.into())
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| reject(e.to_string()))
    }

    /// Sign an access token for `user_id` valid for `ttl`.
    pub fn sign(&self, user_id: i64, ttl: Duration) -> Result<String, Error> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let claims = Claims {
            user_id,
            exp: Utc::now()
                .timestamp()
                .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            token_type: Some("access".to_string()),
        };
        let payload = serde_json::to_vec(&claims).map_err(|e| reject(e.to_string()))?;
        let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(payload));

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }

    /// Check signature, algorithm, expiry and token type.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) => (h, p, s),
                _ => return Err(reject("malformed token")),
            };

        let header: Header = URL_SAFE_NO_PAD
            .decode(header_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| reject("malformed token header"))?;
        if header.alg != "HS256" {
            return Err(reject(format!("unsupported algorithm {}", header.alg)));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| reject("malformed signature"))?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| reject("bad signature"))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| reject("malformed claims"))?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(reject("token expired"));
        }
        if let Some(kind) = claims.token_type.as_deref() {
            if kind != "access" {
                return Err(reject(format!("{} token cannot be used here", kind)));
            }
        }
        Ok(claims)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}
