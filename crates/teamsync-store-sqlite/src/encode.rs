//! Encoding and decoding helpers between domain types and the plain columns
//! stored in SQLite.
//!
//! Timestamps are RFC 3339 UTC strings at second precision with a `Z`
//! suffix, so text comparison orders them chronologically. Unknown ids are
//! stored as `0`, absent roles as `NULL`.

use chrono::{DateTime, SecondsFormat, Utc};
use teamsync_core::{
  audit::SyncAction,
  org::{Mapping, Org},
  plan::{ActionKind, Change, Plan, PlanAction, PlanStatus, TeamRef},
  role::{OrgRole, TeamRole},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Ids and roles ───────────────────────────────────────────────────────────

pub fn encode_id(id: Option<i64>) -> i64 { id.unwrap_or(0) }

pub fn decode_id(raw: Option<i64>) -> Option<i64> { raw.filter(|id| *id != 0) }

pub fn encode_role(role: Option<OrgRole>) -> Option<String> {
  role.map(|r| r.as_ref().to_owned())
}

pub fn decode_role(raw: Option<&str>) -> Result<Option<OrgRole>> {
  match raw.map(str::trim) {
    None | Some("") => Ok(None),
    Some(s) => Ok(Some(OrgRole::parse(s)?)),
  }
}

fn non_empty(raw: Option<String>) -> Option<String> {
  raw.filter(|s| !s.trim().is_empty())
}

// ─── Orgs and mappings ───────────────────────────────────────────────────────

pub struct RawOrg {
  pub id:              i64,
  pub platform_org_id: i64,
  pub name:            Option<String>,
  pub default_role:    Option<String>,
}

impl RawOrg {
  pub fn into_org(self) -> Result<Org> {
    Ok(Org {
      id:              self.id,
      platform_org_id: self.platform_org_id,
      name:            self.name.unwrap_or_default(),
      default_role:    decode_role(self.default_role.as_deref())?,
    })
  }
}

pub struct RawMapping {
  pub id:            i64,
  pub org_id:        i64,
  pub team_name:     String,
  pub team_id:       i64,
  pub group_id:      String,
  pub group_name:    Option<String>,
  pub team_role:     String,
  pub role_override: Option<String>,
}

impl RawMapping {
  pub fn into_mapping(self) -> Result<Mapping> {
    Ok(Mapping {
      id:            self.id,
      org_id:        self.org_id,
      team_name:     self.team_name,
      team_id:       decode_id(Some(self.team_id)),
      group_id:      self.group_id,
      group_name:    non_empty(self.group_name),
      team_role:     TeamRole::normalize(&self.team_role),
      role_override: decode_role(self.role_override.as_deref())?,
    })
  }
}

pub const MAPPING_COLUMNS: &str = "id, org_id, grafana_team_name, grafana_team_id, \
   external_group_id, external_group_name, team_role, role_override";

pub fn mapping_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMapping> {
  Ok(RawMapping {
    id:            row.get(0)?,
    org_id:        row.get(1)?,
    team_name:     row.get(2)?,
    team_id:       row.get(3)?,
    group_id:      row.get(4)?,
    group_name:    row.get(5)?,
    team_role:     row.get(6)?,
    role_override: row.get(7)?,
  })
}

// ─── Plan actions ────────────────────────────────────────────────────────────

/// The flat `plan_actions` row. Every [`Change`] variant maps onto a subset
/// of these columns; the rest are left empty.
#[derive(Debug, Default)]
pub struct PlanActionRow {
  pub id:              i64,
  pub action_type:     String,
  pub org_id:          i64,
  pub platform_org_id: i64,
  pub team_id:         i64,
  pub team_name:       Option<String>,
  pub team_role:       Option<String>,
  pub user_id:         i64,
  pub email:           Option<String>,
  pub display_name:    Option<String>,
  pub role:            Option<String>,
  pub group_id:        Option<String>,
  pub note:            Option<String>,
}

impl PlanActionRow {
  pub fn from_action(action: &PlanAction) -> Self {
    let mut row = Self {
      id: action.id,
      action_type: action.kind().as_ref().to_owned(),
      org_id: action.org_id,
      platform_org_id: action.platform_org_id,
      note: Some(action.note.clone()),
      ..Self::default()
    };

    match &action.change {
      Change::CreateTeam { team_name, team_role, group_id } => {
        row.team_name = Some(team_name.clone());
        row.team_role = Some(team_role.as_ref().to_owned());
        row.group_id = Some(group_id.clone());
      }
      Change::CreateUser { email, display_name, role, team, group_id }
      | Change::BlockedCreateUser { email, display_name, role, team, group_id } => {
        row.set_team(team);
        row.email = Some(email.clone());
        row.display_name = Some(display_name.clone());
        row.role = encode_role(Some(*role));
        row.group_id = Some(group_id.clone());
      }
      Change::AddUserToOrg { user_id, email, role }
      | Change::UpdateUserRole { user_id, email, role } => {
        row.user_id = encode_id(*user_id);
        row.email = Some(email.clone());
        row.role = encode_role(Some(*role));
      }
      Change::AddUserToTeam { team, user_id, email, team_role, role, group_id } => {
        row.set_team(team);
        row.user_id = encode_id(*user_id);
        row.email = Some(email.clone());
        row.team_role = Some(team_role.as_ref().to_owned());
        row.role = encode_role(Some(*role));
        row.group_id = Some(group_id.clone());
      }
      Change::UpdateTeamRole { team, user_id, email, team_role, group_id } => {
        row.set_team(team);
        row.user_id = encode_id(*user_id);
        row.email = Some(email.clone());
        row.team_role = Some(team_role.as_ref().to_owned());
        row.group_id = Some(group_id.clone());
      }
      Change::RemoveUserFromTeam { team, user_id, email, group_id } => {
        row.set_team(team);
        row.user_id = encode_id(*user_id);
        row.email = Some(email.clone());
        row.group_id = Some(group_id.clone());
      }
    }
    row
  }

  fn set_team(&mut self, team: &TeamRef) {
    self.team_id = encode_id(team.id);
    self.team_name = Some(team.name.clone());
  }

  pub fn into_action(self) -> Result<PlanAction> {
    let kind = ActionKind::parse(&self.action_type)?;
    let missing = |field: &'static str| {
      Error::Core(teamsync_core::Error::MissingField { kind: kind.into(), field })
    };

    let email = self.email.clone().unwrap_or_default();
    let group_id = self.group_id.clone().unwrap_or_default();
    let team = TeamRef {
      id:   decode_id(Some(self.team_id)),
      name: self.team_name.clone().unwrap_or_default(),
    };
    let team_role = TeamRole::normalize(self.team_role.as_deref().unwrap_or(""));
    let role = decode_role(self.role.as_deref())?;
    let user_id = decode_id(Some(self.user_id));
    let display_name = self.display_name.clone().unwrap_or_default();

    let change = match kind {
      ActionKind::CreateTeam => Change::CreateTeam {
        team_name: team.name,
        team_role,
        group_id,
      },
      ActionKind::CreateUser => Change::CreateUser {
        email,
        display_name,
        role: role.ok_or_else(|| missing("role"))?,
        team,
        group_id,
      },
      ActionKind::BlockedCreateUser => Change::BlockedCreateUser {
        email,
        display_name,
        role: role.ok_or_else(|| missing("role"))?,
        team,
        group_id,
      },
      ActionKind::AddUserToOrg => Change::AddUserToOrg {
        user_id,
        email,
        role: role.ok_or_else(|| missing("role"))?,
      },
      ActionKind::UpdateUserRole => Change::UpdateUserRole {
        user_id,
        email,
        role: role.ok_or_else(|| missing("role"))?,
      },
      ActionKind::AddUserToTeam => Change::AddUserToTeam {
        team,
        user_id,
        email,
        team_role,
        role: role.ok_or_else(|| missing("role"))?,
        group_id,
      },
      ActionKind::UpdateTeamRole => Change::UpdateTeamRole {
        team,
        user_id,
        email,
        team_role,
        group_id,
      },
      ActionKind::RemoveUserFromTeam => Change::RemoveUserFromTeam {
        team,
        user_id,
        email,
        group_id,
      },
    };

    Ok(PlanAction {
      id: self.id,
      org_id: self.org_id,
      platform_org_id: self.platform_org_id,
      note: self.note.unwrap_or_default(),
      change,
    })
  }
}

pub fn plan_action_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanActionRow> {
  Ok(PlanActionRow {
    id:              row.get(0)?,
    action_type:     row.get(1)?,
    org_id:          row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
    platform_org_id: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
    team_id:         row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
    team_name:       row.get(5)?,
    team_role:       row.get(6)?,
    user_id:         row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
    email:           row.get(8)?,
    display_name:    row.get(9)?,
    role:            row.get(10)?,
    group_id:        row.get(11)?,
    note:            row.get(12)?,
  })
}

// ─── Plans ───────────────────────────────────────────────────────────────────

pub struct RawPlan {
  pub id:         i64,
  pub created_at: String,
  pub status:     String,
  pub actions:    Vec<PlanActionRow>,
}

impl RawPlan {
  pub fn into_plan(self) -> Result<Plan> {
    Ok(Plan {
      id:         self.id,
      created_at: decode_dt(&self.created_at)?,
      status:     PlanStatus::parse(&self.status)?,
      actions:    self
        .actions
        .into_iter()
        .map(PlanActionRow::into_action)
        .collect::<Result<_>>()?,
    })
  }
}

// ─── Audit ledger ────────────────────────────────────────────────────────────

pub struct RawSyncAction {
  pub id:              i64,
  pub created_at:      String,
  pub org_id:          i64,
  pub platform_org_id: Option<i64>,
  pub action_type:     String,
  pub team_name:       Option<String>,
  pub email:           Option<String>,
}

impl RawSyncAction {
  pub fn into_sync_action(self) -> Result<SyncAction> {
    Ok(SyncAction {
      id:              self.id,
      created_at:      decode_dt(&self.created_at)?,
      org_id:          self.org_id,
      platform_org_id: self.platform_org_id.unwrap_or_default(),
      kind:            ActionKind::parse(&self.action_type)?,
      team_name:       self.team_name.unwrap_or_default(),
      email:           self.email.unwrap_or_default(),
    })
  }
}
