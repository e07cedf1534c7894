//! HTTP Basic-auth verification and the middleware guarding the admin
//! surface.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  extract::{Request, State},
  http::{HeaderMap, header::AUTHORIZATION},
  middleware::Next,
  response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use serde::Deserialize;
use teamsync_core::{directory::Directory, platform::Platform, store::MappingStore};
use tracing::debug;

use crate::{AppState, error::Error};

/// Credentials accepted by this server instance.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

/// Verify Basic credentials in `headers` against `config`.
pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<(), Error> {
  let header_val = headers
    .get(AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(Error::Unauthorized)?;

  let encoded = header_val.strip_prefix("Basic ").ok_or(Error::Unauthorized)?;

  let decoded = B64.decode(encoded.trim()).map_err(|_| Error::Unauthorized)?;
  let creds = std::str::from_utf8(&decoded).map_err(|_| Error::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;
  if username != config.username {
    return Err(Error::Unauthorized);
  }

  let parsed_hash = PasswordHash::new(&config.password_hash).map_err(|_| Error::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| Error::Unauthorized)
}

/// Reject the request unless auth is disabled or the credentials verify.
pub async fn require_auth<S, P, D>(
  State(state): State<AppState<S, P, D>>,
  req: Request,
  next: Next,
) -> Result<Response, Error>
where
  S: MappingStore + 'static,
  P: Platform + 'static,
  D: Directory + 'static,
{
  if let Some(auth) = &state.auth
    && let Err(e) = verify_auth(req.headers(), auth)
  {
    debug!(path = %req.uri().path(), "rejected unauthenticated request");
    return Err(e);
  }
  Ok(next.run(req).await)
}
