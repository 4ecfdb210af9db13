//! Token introspection.
//!
//! Access tokens are three dot-separated segments whose middle segment is a
//! URL-safe base64 JSON claims document:
//!
//! ```text
//! header.payload.signature
//! ```
//!
//! No signature verification happens here. The issuing server re-validates
//! every token it receives, so the client only reads claims to reason about
//! expiry and roles. Every helper treats an undecodable token as expired.

use std::collections::BTreeSet;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Role;

/// Default safety margin for expiry checks (30 seconds).
pub const DEFAULT_SKEW_SECS: i64 = 30;

/// URL-safe alphabet, accepting payloads with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Reasons a token could not be introspected.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The token does not have exactly three segments.
    #[error("Malformed token: expected 3 segments, found {0}")]
    SegmentCount(usize),

    /// The payload segment is not valid base64url.
    #[error("Malformed token payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is not a JSON claims document.
    #[error("Malformed token claims: {0}")]
    Json(#[from] serde_json::Error),
}

/// The `aud` claim, which may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Claims read from an access token payload.
///
/// Only produced by [`decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
}

impl DecodedClaims {
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &BTreeSet<Role>) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}

/// Decode the claims of a compact token.
pub fn decode(token: &str) -> Result<DecodedClaims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }
    let payload = URL_SAFE_LENIENT.decode(segments[1])?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether the token is expired, or will be within `skew_secs`.
///
/// Also `true` when the token is undecodable or carries no `exp`.
pub fn is_expired(token: &str, skew_secs: i64) -> bool {
    is_expired_at(token, skew_secs, now_millis())
}

/// [`is_expired`] evaluated at a fixed instant.
pub fn is_expired_at(token: &str, skew_secs: i64, now_ms: i64) -> bool {
    match decode(token) {
        Ok(DecodedClaims { exp: Some(exp), .. }) => {
            exp_millis(exp) <= now_ms.saturating_add(skew_secs.saturating_mul(1000))
        }
        Ok(_) => true,
        Err(e) => {
            debug!(error = %e, "Treating undecodable token as expired");
            true
        }
    }
}

/// `exp` in milliseconds; out-of-range values clamp to the far past or future.
fn exp_millis(exp: i64) -> i64 {
    exp.saturating_mul(1000)
}

/// Whole seconds until the token expires, clamped to zero.
pub fn time_remaining(token: &str) -> u64 {
    time_remaining_at(token, now_millis())
}

/// [`time_remaining`] evaluated at a fixed instant.
pub fn time_remaining_at(token: &str, now_ms: i64) -> u64 {
    match decode(token) {
        Ok(DecodedClaims { exp: Some(exp), .. }) => {
            let remaining_ms = exp_millis(exp).saturating_sub(now_ms);
            u64::try_from(remaining_ms / 1000).unwrap_or(0)
        }
        _ => 0,
    }
}

/// Whether the token is still valid but expires within `window_secs`.
pub fn should_refresh(token: &str, window_secs: u64) -> bool {
    let remaining = time_remaining(token);
    remaining > 0 && remaining < window_secs
}

/// Roles carried by the token, empty when undecodable.
pub fn roles(token: &str) -> BTreeSet<Role> {
    decode(token).map(|c| c.roles).unwrap_or_default()
}

/// Debug snapshot of a token that never exposes the token itself.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDiagnostics {
    pub present: bool,
    pub decodable: bool,
    pub expired: bool,
    pub seconds_remaining: u64,
    pub subject: Option<String>,
    pub roles: BTreeSet<Role>,
}

impl TokenDiagnostics {
    pub fn inspect(token: Option<&str>, skew_secs: i64) -> Self {
        let Some(token) = token else {
            return Self {
                present: false,
                decodable: false,
                expired: true,
                seconds_remaining: 0,
                subject: None,
                roles: BTreeSet::new(),
            };
        };
        let claims = decode(token).ok();
        Self {
            present: true,
            decodable: claims.is_some(),
            expired: is_expired(token, skew_secs),
            seconds_remaining: time_remaining(token),
            subject: claims.as_ref().map(|c| c.sub.clone()),
            roles: claims.map(|c| c.roles).unwrap_or_default(),
        }
    }
}
