//! Error types for `teamsync-entra`.

use thiserror::Error;

/// Failures while constructing a [`crate::EntraClient`]. Request failures
/// are reported as `DirectoryError`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("entra {0} is not configured")]
  Missing(&'static str),

  #[error("invalid graph base url {0:?}")]
  GraphUrl(String),

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
