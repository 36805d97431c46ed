//! Bearer token lifecycle: exchange the refresh secret, cache the result, and
//! refresh before expiry.

use crate::auth::credentials::Credential;
use crate::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

/// OAuth client registered for API key exchanges
const CLIENT_ID: &str = "ast-app";

/// A token is refreshed once it is this close to expiry. Tokens that live
/// less than twice this long use half their lifetime as the margin instead.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the identity endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 600;

/// Short-lived bearer credential. Replaced on refresh, never mutated.
#[derive(Clone)]
pub struct Token {
    bearer: String,
    expires_at: DateTime<Utc>,
    refresh_at: DateTime<Utc>,
}

impl Token {
    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while `now` is before expiry minus the safety margin.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }

    fn issued(bearer: String, issued_at: DateTime<Utc>, expires_in: i64) -> Self {
        let (lifetime, expires_at) = TimeDelta::try_seconds(expires_in)
            .and_then(|lifetime| Some((lifetime, issued_at.checked_add_signed(lifetime)?)))
            .unwrap_or_else(|| {
                tracing::warn!(
                    "expires_in of {}s is out of range, assuming {}s",
                    expires_in,
                    DEFAULT_EXPIRES_IN_SECS
                );
                let lifetime = TimeDelta::seconds(DEFAULT_EXPIRES_IN_SECS);
                (lifetime, issued_at + lifetime)
            });

        let margin = TimeDelta::seconds(TOKEN_SAFETY_MARGIN_SECS).min(lifetime / 2);
        Self {
            bearer,
            expires_at,
            refresh_at: expires_at - margin,
        }
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("bearer", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Owns the cached token for one tenant session.
///
/// Shared between concurrent fetch tasks behind an `Arc`. The expiry check and
/// the refresh run under one async lock, so callers racing near expiry cause a
/// single exchange and all observe the same replacement token.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    credential: Credential,
    cached: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, identity_url: &str, credential: Credential) -> Self {
        let token_url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            identity_url.trim_end_matches('/'),
            credential.tenant
        );
        Self {
            http,
            token_url,
            credential,
            cached: Mutex::new(None),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Return a token that is valid for at least the safety margin,
    /// exchanging the refresh secret only when the cached one is stale.
    pub async fn ensure_valid_token(&self) -> Result<Token> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh_at(Utc::now()) {
                return Ok(token.clone());
            }
            tracing::debug!(
                "Token expires at {}, refreshing",
                token.expires_at.to_rfc3339()
            );
        }

        let token = self.exchange().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn exchange(&self) -> Result<Token> {
        tracing::debug!("Exchanging API key for tenant '{}'", self.credential.tenant);

        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", CLIENT_ID),
                ("refresh_token", self.credential.api_key()),
            ])
            .send()
            .await
            .map_err(|e| Error::Authentication {
                status: None,
                body: format!("request to {} failed: {}", self.token_url, e),
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::error!("Token exchange failed: {} - {}", status, body);
            return Err(Error::Authentication {
                status: Some(status.as_u16()),
                body,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Authentication {
                status: Some(status.as_u16()),
                body: format!("unreadable token response ({}): {}", e, body),
            })?;

        let bearer = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Authentication {
                status: Some(status.as_u16()),
                body: format!("access_token missing from response: {}", body),
            })?;

        let expires_in = parsed
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        let token = Token::issued(bearer, Utc::now(), expires_in);
        tracing::info!(
            "Obtained access token for tenant '{}' (expires at {})",
            self.credential.tenant,
            token.expires_at.to_rfc3339()
        );
        Ok(token)
    }

    /// Mark the cached token as expired so the next call refreshes it.
    #[cfg(test)]
    pub(crate) async fn force_expire(&self) {
        if let Some(token) = self.cached.lock().await.as_mut() {
            token.expires_at = Utc::now() - TimeDelta::seconds(1);
            token.refresh_at = token.expires_at;
        }
    }
}
