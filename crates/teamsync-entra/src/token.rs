//! Client-credentials access token cache.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use teamsync_core::directory::DirectoryError;
use tokio::sync::RwLock;
use tracing::debug;

/// Refresh this long before the token actually expires.
const EXPIRY_GRACE_SECS: i64 = 120;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Deserialize)]
struct TokenResponse {
  #[serde(default)]
  access_token: String,
  #[serde(default)]
  expires_in:   i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
  access_token: String,
  expires_at:   DateTime<Utc>,
}

impl CachedToken {
  fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    now + Duration::seconds(EXPIRY_GRACE_SECS) < self.expires_at
  }
}

pub struct TokenCache {
  token_url:     String,
  client_id:     String,
  client_secret: String,
  cached:        RwLock<Option<CachedToken>>,
}

impl TokenCache {
  pub fn new(authority: &str, tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
    Self {
      token_url:     format!(
        "{}/{}/oauth2/v2.0/token",
        authority.trim_end_matches('/'),
        tenant_id
      ),
      client_id:     client_id.to_owned(),
      client_secret: client_secret.to_owned(),
      cached:        RwLock::new(None),
    }
  }

  /// A valid access token, fetching a new one when the cached token is
  /// missing or about to expire. Concurrent callers share one refresh.
  pub async fn get(&self, http: &Client) -> Result<String, DirectoryError> {
    if let Some(token) = self.cached.read().await.as_ref()
      && token.is_fresh(Utc::now())
    {
      return Ok(token.access_token.clone());
    }

    let mut cached = self.cached.write().await;
    if let Some(token) = cached.as_ref()
      && token.is_fresh(Utc::now())
    {
      return Ok(token.access_token.clone());
    }

    let token = self.acquire(http).await?;
    let access_token = token.access_token.clone();
    *cached = Some(token);
    Ok(access_token)
  }

  /// Drop the cached token so the next request fetches a new one.
  pub async fn invalidate(&self) { *self.cached.write().await = None; }

  async fn acquire(&self, http: &Client) -> Result<CachedToken, DirectoryError> {
    debug!(url = %self.token_url, "requesting access token");
    let resp = http
      .post(&self.token_url)
      .form(&[
        ("client_id", self.client_id.as_str()),
        ("client_secret", self.client_secret.as_str()),
        ("scope", GRAPH_SCOPE),
        ("grant_type", "client_credentials"),
      ])
      .send()
      .await
      .map_err(|e| DirectoryError::Auth(format!("token request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(DirectoryError::Auth(format!(
        "token endpoint returned {status}: {}",
        body.trim()
      )));
    }

    let token: TokenResponse = resp
      .json()
      .await
      .map_err(|e| DirectoryError::Auth(format!("invalid token response: {e}")))?;
    if token.access_token.is_empty() {
      return Err(DirectoryError::Auth("token endpoint returned an empty access token".into()));
    }

    Ok(CachedToken {
      access_token: token.access_token,
      expires_at:   Utc::now() + Duration::seconds(token.expires_in),
    })
  }
}
