//! Error types for `teamsync-grafana`.

use thiserror::Error;

/// Failures while constructing a [`crate::GrafanaClient`]. Request failures
/// are reported as `PlatformError`.
#[derive(Debug, Error)]
pub enum Error {
  #[error("grafana url is empty")]
  MissingUrl,

  #[error("failed to build HTTP client: {0}")]
  Client(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
