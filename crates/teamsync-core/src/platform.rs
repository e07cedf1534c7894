//! The `Platform` trait: the dashboarding platform being provisioned.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::{OrgRole, TeamRole};

// ─── Platform records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUser {
  pub id:    i64,
  pub login: String,
  pub email: String,
  pub name:  String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
  pub id:   i64,
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
  pub user_id: i64,
  pub login:   String,
  pub email:   String,
  pub name:    String,
  pub role:    TeamRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUser {
  pub user_id: i64,
  pub login:   String,
  pub email:   String,
  pub name:    String,
  /// Role as reported by the platform; may name a role we never assign.
  pub role:    String,
}

/// Input for [`Platform::create_user`].
#[derive(Clone)]
pub struct NewUser {
  pub email:    String,
  pub login:    String,
  pub name:     String,
  pub password: String,
}

impl fmt::Debug for NewUser {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NewUser")
      .field("email", &self.email)
      .field("login", &self.login)
      .field("name", &self.name)
      .field("password", &"<redacted>")
      .finish()
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Outcome of a failed platform call, classified so callers can decide which
/// failures are recoverable without inspecting message text.
#[derive(Debug, Error)]
pub enum PlatformError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  /// The membership is controlled by another system (e.g. an external auth
  /// provider) and must not be overwritten.
  #[error("externally managed: {0}")]
  ExternallyManaged(String),

  #[error("platform returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("platform request failed: {0}")]
  Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Operations the engine invokes on the target platform.
///
/// `org` arguments are platform org ids, not internal ones.
pub trait Platform: Send + Sync {
  /// Find a team by name (case-insensitive). `None` if absent.
  fn search_team<'a>(
    &'a self,
    org: i64,
    name: &'a str,
  ) -> impl Future<Output = PlatformResult<Option<i64>>> + Send + 'a;

  /// Return the id of the named team, creating it if needed.
  fn ensure_team<'a>(
    &'a self,
    org: i64,
    name: &'a str,
  ) -> impl Future<Output = PlatformResult<i64>> + Send + 'a;

  fn list_teams(
    &self,
    org: i64,
  ) -> impl Future<Output = PlatformResult<Vec<Team>>> + Send + '_;

  fn list_team_members(
    &self,
    team_id: i64,
  ) -> impl Future<Output = PlatformResult<Vec<TeamMember>>> + Send + '_;

  /// Look a user up by login or email. `None` if no such user.
  fn lookup_user<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = PlatformResult<Option<PlatformUser>>> + Send + 'a;

  fn create_user(
    &self,
    user: NewUser,
  ) -> impl Future<Output = PlatformResult<PlatformUser>> + Send + '_;

  fn add_user_to_org<'a>(
    &'a self,
    org: i64,
    email: &'a str,
    role: OrgRole,
  ) -> impl Future<Output = PlatformResult<()>> + Send + 'a;

  fn update_user_role(
    &self,
    org: i64,
    user_id: i64,
    role: OrgRole,
  ) -> impl Future<Output = PlatformResult<()>> + Send + '_;

  fn add_user_to_team(
    &self,
    team_id: i64,
    user_id: i64,
    role: TeamRole,
  ) -> impl Future<Output = PlatformResult<()>> + Send + '_;

  fn update_team_member_role(
    &self,
    team_id: i64,
    user_id: i64,
    role: TeamRole,
  ) -> impl Future<Output = PlatformResult<()>> + Send + '_;

  fn remove_user_from_team(
    &self,
    team_id: i64,
    user_id: i64,
  ) -> impl Future<Output = PlatformResult<()>> + Send + '_;

  fn list_org_users(
    &self,
    org: i64,
  ) -> impl Future<Output = PlatformResult<Vec<OrgUser>>> + Send + '_;
}
