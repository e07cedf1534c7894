//! Managed organizations and the group → team mappings that target them.

use serde::{Deserialize, Serialize};

use crate::role::{OrgRole, TeamRole};

/// One platform organization under management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
  pub id:              i64,
  pub platform_org_id: i64,
  pub name:            String,
  /// Role granted to mapped users when the mapping has no override.
  pub default_role:    Option<OrgRole>,
}

impl Org {
  /// Display label used in plan notes; falls back to the internal id.
  pub fn label(&self) -> String {
    if self.name.trim().is_empty() {
      format!("org {}", self.id)
    } else {
      self.name.clone()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrg {
  pub platform_org_id: i64,
  #[serde(default)]
  pub name:            String,
  pub default_role:    Option<OrgRole>,
}

/// A rule binding one directory group to one platform team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
  pub id:            i64,
  pub org_id:        i64,
  pub team_name:     String,
  /// Platform team id, cached once the team has been resolved or created.
  pub team_id:       Option<i64>,
  pub group_id:      String,
  pub group_name:    Option<String>,
  pub team_role:     TeamRole,
  pub role_override: Option<OrgRole>,
}

impl Mapping {
  /// `"<group name> (<group id>)"`, or whichever half is present.
  pub fn group_label(&self) -> String {
    let name = self.group_name.as_deref().map(str::trim).unwrap_or("");
    match (name.is_empty(), self.group_id.is_empty()) {
      (true, _) => self.group_id.clone(),
      (false, true) => name.to_owned(),
      (false, false) => format!("{name} ({})", self.group_id),
    }
  }

  pub fn team_label(&self) -> String {
    if self.team_name.trim().is_empty() {
      format!("team {}", self.team_id.unwrap_or_default())
    } else {
      self.team_name.clone()
    }
  }
}

/// Input for creating or replacing a mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMapping {
  pub org_id:        i64,
  pub team_name:     String,
  #[serde(default)]
  pub team_id:       Option<i64>,
  pub group_id:      String,
  #[serde(default)]
  pub group_name:    Option<String>,
  #[serde(default)]
  pub team_role:     TeamRole,
  #[serde(default)]
  pub role_override: Option<OrgRole>,
}
