//! Plans and the typed actions they are made of.
//!
//! A [`Plan`] is an ordered batch of [`PlanAction`]s. Each action wraps a
//! [`Change`], a closed enum with one variant per action kind that carries
//! only the fields that kind needs. The flat persisted form (one column per
//! field, `action_type` as the discriminant) lives in the store crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

use crate::{
  Error, Result,
  role::{OrgRole, TeamRole},
};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// Field-less discriminant of [`Change`]; persisted as `action_type`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
  CreateTeam,
  CreateUser,
  AddUserToOrg,
  UpdateUserRole,
  AddUserToTeam,
  UpdateTeamRole,
  RemoveUserFromTeam,
  BlockedCreateUser,
}

impl ActionKind {
  pub fn parse(raw: &str) -> Result<Self> {
    raw
      .parse()
      .map_err(|_| Error::UnknownActionKind(raw.to_owned()))
  }

  /// Execution phase. Teams and users are created before any membership
  /// references them.
  pub fn phase(self) -> u8 {
    match self {
      Self::CreateTeam => 1,
      Self::CreateUser => 2,
      Self::AddUserToOrg => 3,
      Self::UpdateUserRole => 4,
      Self::AddUserToTeam => 5,
      Self::UpdateTeamRole => 6,
      Self::RemoveUserFromTeam => 7,
      Self::BlockedCreateUser => 8,
    }
  }

  /// Blocked entries are informational and never executed.
  pub fn is_selectable(self) -> bool { !matches!(self, Self::BlockedCreateUser) }

  /// Whether executing this kind changes a specific user's access.
  pub fn affects_user(self) -> bool {
    !matches!(self, Self::CreateTeam | Self::BlockedCreateUser)
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::CreateTeam => "Create team",
      Self::CreateUser => "Create user",
      Self::AddUserToOrg => "Add to org",
      Self::UpdateUserRole => "Update org role",
      Self::AddUserToTeam => "Add to team",
      Self::UpdateTeamRole => "Update team role",
      Self::RemoveUserFromTeam => "Remove from team",
      Self::BlockedCreateUser => "Blocked create user",
    }
  }
}

// ─── Change ──────────────────────────────────────────────────────────────────

/// A platform team as referenced by an action. The id is absent when the
/// team is created earlier in the same plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
  pub id:   Option<i64>,
  pub name: String,
}

/// One atomic change to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
  CreateTeam {
    team_name: String,
    team_role: TeamRole,
    group_id:  String,
  },
  CreateUser {
    email:        String,
    display_name: String,
    role:         OrgRole,
    team:         TeamRef,
    group_id:     String,
  },
  /// The user is missing and creation is disabled; shown to operators only.
  BlockedCreateUser {
    email:        String,
    display_name: String,
    role:         OrgRole,
    team:         TeamRef,
    group_id:     String,
  },
  AddUserToOrg {
    user_id: Option<i64>,
    email:   String,
    role:    OrgRole,
  },
  UpdateUserRole {
    user_id: Option<i64>,
    email:   String,
    role:    OrgRole,
  },
  AddUserToTeam {
    team:      TeamRef,
    user_id:   Option<i64>,
    email:     String,
    team_role: TeamRole,
    role:      OrgRole,
    group_id:  String,
  },
  UpdateTeamRole {
    team:      TeamRef,
    user_id:   Option<i64>,
    email:     String,
    team_role: TeamRole,
    group_id:  String,
  },
  RemoveUserFromTeam {
    team:     TeamRef,
    user_id:  Option<i64>,
    email:    String,
    group_id: String,
  },
}

impl Change {
  pub fn kind(&self) -> ActionKind {
    match self {
      Self::CreateTeam { .. } => ActionKind::CreateTeam,
      Self::CreateUser { .. } => ActionKind::CreateUser,
      Self::BlockedCreateUser { .. } => ActionKind::BlockedCreateUser,
      Self::AddUserToOrg { .. } => ActionKind::AddUserToOrg,
      Self::UpdateUserRole { .. } => ActionKind::UpdateUserRole,
      Self::AddUserToTeam { .. } => ActionKind::AddUserToTeam,
      Self::UpdateTeamRole { .. } => ActionKind::UpdateTeamRole,
      Self::RemoveUserFromTeam { .. } => ActionKind::RemoveUserFromTeam,
    }
  }

  /// The user this change concerns, if any.
  pub fn email(&self) -> Option<&str> {
    match self {
      Self::CreateTeam { .. } => None,
      Self::CreateUser { email, .. }
      | Self::BlockedCreateUser { email, .. }
      | Self::AddUserToOrg { email, .. }
      | Self::UpdateUserRole { email, .. }
      | Self::AddUserToTeam { email, .. }
      | Self::UpdateTeamRole { email, .. }
      | Self::RemoveUserFromTeam { email, .. } => Some(email),
    }
  }

  /// The team this change concerns, if any.
  pub fn team_name(&self) -> Option<&str> {
    match self {
      Self::CreateTeam { team_name, .. } => Some(team_name),
      Self::CreateUser { team, .. }
      | Self::BlockedCreateUser { team, .. }
      | Self::AddUserToTeam { team, .. }
      | Self::UpdateTeamRole { team, .. }
      | Self::RemoveUserFromTeam { team, .. } => Some(&team.name),
      Self::AddUserToOrg { .. } | Self::UpdateUserRole { .. } => None,
    }
  }
}

// ─── Action ──────────────────────────────────────────────────────────────────

/// A [`Change`] scoped to an org, with the note explaining why it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAction {
  /// Unique and stable within its plan; used for selective execution.
  pub id:              i64,
  pub org_id:          i64,
  pub platform_org_id: i64,
  pub note:            String,
  #[serde(flatten)]
  pub change:          Change,
}

impl PlanAction {
  pub fn kind(&self) -> ActionKind { self.change.kind() }
}

/// Stable-sort actions into execution phase order. Relative order within a
/// phase is preserved.
pub fn sort_by_phase(actions: &mut [PlanAction]) {
  actions.sort_by_key(|a| a.kind().phase());
}

// ─── Plan ────────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PlanStatus {
  Planned,
  Applying,
  Applied,
  Failed,
  ApplyingSelected,
  AppliedSelected,
}

impl PlanStatus {
  pub fn parse(raw: &str) -> Result<Self> {
    raw
      .parse()
      .map_err(|_| Error::UnknownPlanStatus(raw.to_owned()))
  }
}

/// A plan as built, before the store assigns it an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlan {
  pub created_at: DateTime<Utc>,
  pub actions:    Vec<PlanAction>,
}

/// The single current plan as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
  pub id:         i64,
  pub created_at: DateTime<Utc>,
  pub status:     PlanStatus,
  pub actions:    Vec<PlanAction>,
}

impl Plan {
  /// The selectable actions whose ids appear in `ids`, in plan order.
  pub fn select(&self, ids: &[i64]) -> Vec<PlanAction> {
    self
      .actions
      .iter()
      .filter(|a| ids.contains(&a.id) && a.kind().is_selectable())
      .cloned()
      .collect()
  }
}
