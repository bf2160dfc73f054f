//! Credential and flow records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are refreshed once less than this much lifetime remains.
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

/// Token triple as returned by the refresh mutation and the token subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Payload of `startAuthenticationFlow.request`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRequest {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub user_code: Option<String>,
    pub verification_url: String,
}

/// A device flow that was started but has not produced a token yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthRequest {
    pub request_id: String,
    pub verification_url: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingAuthRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl From<&AuthenticationRequest> for PendingAuthRequest {
    fn from(request: &AuthenticationRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            verification_url: request.verification_url.clone(),
            expires_at: request.expires_at,
        }
    }
}

/// Persisted credential, scoped to the instance it was issued by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "baseUrl")]
    pub source_endpoint: String,
    pub saved_at: DateTime<Utc>,
}

impl Credential {
    pub fn issued(token: AuthToken, source_endpoint: &str) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token.expires_at,
            source_endpoint: source_endpoint.to_string(),
            saved_at: Utc::now(),
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        expires_soon(self.expires_at, now)
    }
}

/// A missing expiry never expires.
pub fn expires_soon(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expiry) => now >= expiry - Duration::minutes(REFRESH_MARGIN_MINUTES),
        None => false,
    }
}

/// First characters of a secret, for log lines.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}...")
}
