use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identity::Identity;

/// A provider session. Opaque to consumers; its lifetime is bounded by the
/// provider-side expiry in `expires_at` (unix seconds).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<Identity>,
}

impl Session {
    /// Build a session from a bare access token, reading `exp` out of the
    /// JWT payload when the caller didn't supply an expiry.
    pub fn from_tokens(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        let expires_at = expires_at.or_else(|| jwt_expiry(&access_token));
        Session {
            access_token,
            refresh_token,
            expires_at,
            user: None,
        }
    }

    /// Sessions without a known expiry are treated as live; the provider
    /// will reject them if they are not.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Reads the `exp` claim without verifying the signature. Only used to
/// schedule refreshes; the provider remains the authority on validity.
fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_i64()
}
