//! Grafana JSON payloads and HTTP error classification.

use serde::{Deserialize, Serialize};
use teamsync_core::{
  platform::{OrgUser, PlatformError, PlatformUser, Team, TeamMember},
  role::TeamRole,
};

/// Message id Grafana reports when an org role is owned by an external auth
/// provider.
const EXTERNALLY_SYNCED: &str = "org.externallySynced";

/// Team permission value Grafana uses for team admins.
const TEAM_ADMIN_PERMISSION: i64 = 4;

// ─── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserDto {
  pub id:    i64,
  #[serde(default)]
  pub login: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub name:  String,
}

impl From<UserDto> for PlatformUser {
  fn from(u: UserDto) -> Self {
    Self { id: u.id, login: u.login, email: u.email, name: u.name }
  }
}

#[derive(Debug, Deserialize)]
pub struct TeamDto {
  pub id:   i64,
  pub name: String,
}

impl From<TeamDto> for Team {
  fn from(t: TeamDto) -> Self { Self { id: t.id, name: t.name } }
}

#[derive(Debug, Deserialize)]
pub struct TeamSearch {
  #[serde(default)]
  pub teams: Vec<TeamDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberDto {
  pub user_id:    i64,
  #[serde(default)]
  pub login:      String,
  #[serde(default)]
  pub email:      String,
  #[serde(default)]
  pub name:       String,
  #[serde(default)]
  pub role:       String,
  #[serde(default)]
  pub permission: i64,
}

impl From<TeamMemberDto> for TeamMember {
  fn from(m: TeamMemberDto) -> Self {
    let role = if m.permission == TEAM_ADMIN_PERMISSION {
      TeamRole::Admin
    } else {
      TeamRole::normalize(&m.role)
    };
    Self { user_id: m.user_id, login: m.login, email: m.email, name: m.name, role }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgUserDto {
  pub user_id: i64,
  #[serde(default)]
  pub login:   String,
  #[serde(default)]
  pub email:   String,
  #[serde(default)]
  pub name:    String,
  #[serde(default)]
  pub role:    String,
}

impl From<OrgUserDto> for OrgUser {
  fn from(u: OrgUserDto) -> Self {
    Self { user_id: u.user_id, login: u.login, email: u.email, name: u.name, role: u.role }
  }
}

#[derive(Debug, Deserialize)]
pub struct CreatedUser {
  pub id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTeam {
  #[serde(default)]
  pub team_id: i64,
}

// ─── Requests ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CreateUserBody<'a> {
  pub name:     &'a str,
  pub email:    &'a str,
  pub login:    &'a str,
  pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOrgUserBody<'a> {
  pub login_or_email: &'a str,
  pub role:           &'a str,
}

#[derive(Debug, Serialize)]
pub struct RoleBody<'a> {
  pub role: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeamBody<'a> {
  pub name:   &'a str,
  pub org_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTeamMemberBody {
  pub user_id: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub role:    Option<&'static str>,
}

/// Grafana spells team roles capitalised.
pub fn team_role_name(role: TeamRole) -> &'static str {
  match role {
    TeamRole::Member => "Member",
    TeamRole::Admin => "Admin",
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Map a non-success response onto a [`PlatformError`].
pub fn classify(status: u16, body: String) -> PlatformError {
  let body = body.trim().to_owned();
  if body.contains(EXTERNALLY_SYNCED) {
    return PlatformError::ExternallyManaged(body);
  }
  match status {
    404 => PlatformError::NotFound(body),
    409 => PlatformError::Conflict(body),
    _ => PlatformError::Status { status, body },
  }
}
