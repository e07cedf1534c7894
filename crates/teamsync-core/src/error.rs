//! Error types for `teamsync-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown org role: {0:?}")]
  UnknownOrgRole(String),

  #[error("unknown action kind: {0:?}")]
  UnknownActionKind(String),

  #[error("unknown plan status: {0:?}")]
  UnknownPlanStatus(String),

  #[error("{kind} action is missing its {field}")]
  MissingField {
    kind:  &'static str,
    field: &'static str,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
