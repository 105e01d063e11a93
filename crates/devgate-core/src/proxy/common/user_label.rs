//! Per-user metric labels derived from the inbound Authorization header.
//!
//! When the bearer token is a JWT carrying an email claim, the label is the
//! first 8 hex chars of the SHA-256 of that email. The token is never
//! verified — the label exists for cardinality-bounded metric grouping, not
//! for authentication.

use base64::Engine;
use sha2::{Digest, Sha256};

const UNKNOWN: &str = "unknown";

/// Derive the metrics `user` label from an Authorization header value.
pub fn user_label(auth_header: Option<&str>) -> String {
    auth_header
        .and_then(|h| h.strip_prefix("Bearer ").or(Some(h)))
        .and_then(email_from_jwt)
        .map(|email| hash8(&email))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn email_from_jwt(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    parts.next()?; // must have a signature segment to look like a JWT

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("email").and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn hash8(email: &str) -> String {
    let digest = Sha256::digest(email.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
