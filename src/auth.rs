use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{ParcelExchangeError, Result};

const TOKEN_BYTES: usize = 32;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of the credential; this is what gets stored.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.trim().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Pulls the bearer credential from the `Authorization` header, falling
/// back to a `token` query parameter for browser WebSocket clients.
pub fn bearer_token(headers: &HeaderMap, query_token: Option<&str>) -> Result<String> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("").trim();
    if !bearer.is_empty() {
        return Ok(bearer.to_string());
    }
    query_token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ParcelExchangeError::Unauthorized("missing bearer token".to_string()))
}
