//! Error type for `teamsync-engine`.

use teamsync_core::{directory::DirectoryError, platform::PlatformError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Platform(#[from] PlatformError),

  #[error(transparent)]
  Directory(#[from] DirectoryError),

  /// A team action ran before its team id was known.
  #[error("missing team id for {team:?}")]
  UnresolvedTeam { team: String },

  #[error("no plan available")]
  NoPlan,

  #[error("no valid actions selected")]
  NothingSelected,

  #[error("a sync is already running")]
  Busy,
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
