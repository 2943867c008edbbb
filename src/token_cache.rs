//! OAuth2 client-credentials token cache.
//!
//! Lifecycle: `Empty → Valid → Expiring → Empty`. A cached token is handed out
//! while it has more than [`EXPIRY_BUFFER_SECS`] left; otherwise a fresh
//! exchange is made. `invalidate()` forces `Empty` after a provider rejects
//! the token (401), so the next call re-authenticates.
//!
//! No lock is held across the exchange. Two callers racing past an expired
//! token both refresh; the later write wins and the extra call is only waste.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SourceError;
use crate::fetch::{DeadlineFetcher, RequestOptions};

pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Used when the identity provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Both variables must be present and non-blank.
    pub fn from_env(id_var: &str, secret_var: &str) -> Option<Self> {
        let id = std::env::var(id_var).ok()?.trim().to_string();
        let secret = std::env::var(secret_var).ok()?.trim().to_string();
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        Some(Self {
            client_id: id,
            client_secret: secret,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Empty,
    Valid,
    /// Still cached but inside the expiry buffer; the next `get()` refreshes.
    /// A token past its expiry reports `Empty`.
    Expiring,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct TokenCache {
    token_endpoint: String,
    credentials: Option<ClientCredentials>,
    fetcher: DeadlineFetcher,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(
        token_endpoint: impl Into<String>,
        credentials: Option<ClientCredentials>,
        fetcher: DeadlineFetcher,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            credentials,
            fetcher,
            clock,
            timeout,
            slot: RwLock::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn state(&self) -> TokenState {
        let now = self.clock.now();
        let g = self.slot.read().expect("token slot poisoned");
        match g.as_ref() {
            None => TokenState::Empty,
            Some(t) if is_fresh(t, now) => TokenState::Valid,
            Some(t) if t.expires_at > now => TokenState::Expiring,
            Some(_) => TokenState::Empty,
        }
    }

    /// Cached bearer token, or a freshly exchanged one.
    pub async fn get(&self) -> Result<String, SourceError> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| SourceError::Config("client credentials not configured".to_string()))?;

        let now = self.clock.now();
        {
            let g = self.slot.read().expect("token slot poisoned");
            if let Some(t) = g.as_ref().filter(|t| is_fresh(t, now)) {
                return Ok(t.access_token.clone());
            }
        }

        let fresh = self.exchange(creds).await?;
        let token = fresh.access_token.clone();
        *self.slot.write().expect("token slot poisoned") = Some(fresh);
        Ok(token)
    }

    /// Drop the cached token so the next `get()` re-authenticates.
    pub fn invalidate(&self) {
        let mut g = self.slot.write().expect("token slot poisoned");
        if g.take().is_some() {
            info!(target: "token", endpoint = %self.token_endpoint, "token invalidated");
        }
    }

    async fn exchange(&self, creds: &ClientCredentials) -> Result<CachedToken, SourceError> {
        debug!(target: "token", endpoint = %self.token_endpoint, "exchanging client credentials");
        let opts = RequestOptions::post_form(&[
            ("grant_type", "client_credentials"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
        ]);

        let resp = self
            .fetcher
            .try_fetch(&self.token_endpoint, opts, self.timeout)
            .await
            .map_err(|f| {
                counter!("token_exchange_total", "outcome" => "unreachable").increment(1);
                SourceError::from(f)
            })?;

        // Identity providers answer bad credentials with 400 or 401.
        if matches!(resp.status, 400 | 401 | 403) {
            counter!("token_exchange_total", "outcome" => "rejected").increment(1);
            warn!(target: "token", status = resp.status, "client credentials rejected");
            return Err(SourceError::Auth(format!(
                "token endpoint returned {}",
                resp.status
            )));
        }
        let body: TokenResponse = resp.error_for_status()?.json().map_err(|e| {
            counter!("token_exchange_total", "outcome" => "malformed").increment(1);
            SourceError::Auth(format!("malformed token response: {e}"))
        })?;
        if body.access_token.trim().is_empty() {
            return Err(SourceError::Auth("empty access_token".to_string()));
        }

        let expires_in = body
            .expires_in
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = self.clock.now() + chrono::Duration::seconds(expires_in);
        counter!("token_exchange_total", "outcome" => "ok").increment(1);
        info!(target: "token", expires_in, "bearer token refreshed");

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at,
        })
    }
}

fn is_fresh(t: &CachedToken, now: DateTime<Utc>) -> bool {
    t.expires_at - chrono::Duration::seconds(EXPIRY_BUFFER_SECS) > now
}
