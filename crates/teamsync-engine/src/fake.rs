//! In-memory `Directory` and `Platform` implementations for engine tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Mutex,
};

use teamsync_core::{
  directory::{Directory, DirectoryError, DirectoryGroup, DirectoryMember},
  identity::normalize_email,
  platform::{
    NewUser, OrgUser, Platform, PlatformError, PlatformResult, PlatformUser, Team, TeamMember,
  },
  role::{OrgRole, TeamRole},
};

// ─── Directory ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDirectory {
  groups:  Mutex<BTreeMap<String, Vec<DirectoryMember>>>,
  failing: Mutex<BTreeSet<String>>,
}

impl FakeDirectory {
  /// Replace the members of `group` with one entry per email.
  pub fn set_group(&self, group: &str, emails: &[&str]) {
    let members = emails
      .iter()
      .map(|email| DirectoryMember {
        id:                  format!("dir-{email}"),
        display_name:        Some(email.split('@').next().unwrap_or(email).to_owned()),
        mail:                Some((*email).to_owned()),
        user_principal_name: Some((*email).to_owned()),
      })
      .collect();
    self.groups.lock().unwrap().insert(group.to_owned(), members);
  }

  pub fn fail_group(&self, group: &str) {
    self.failing.lock().unwrap().insert(group.to_owned());
  }
}

impl Directory for FakeDirectory {
  async fn list_group_members(
    &self,
    group_id: &str,
  ) -> Result<Vec<DirectoryMember>, DirectoryError> {
    if self.failing.lock().unwrap().contains(group_id) {
      return Err(DirectoryError::Status { status: 503, body: "unavailable".into() });
    }
    Ok(self.groups.lock().unwrap().get(group_id).cloned().unwrap_or_default())
  }

  async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
    Ok(
      self
        .groups
        .lock()
        .unwrap()
        .keys()
        .map(|id| DirectoryGroup {
          id:               id.clone(),
          display_name:     format!("{id} group"),
          mail:             None,
          security_enabled: true,
          mail_enabled:     false,
        })
        .collect(),
    )
  }

  /// Everyone in any group, once.
  async fn list_users(&self) -> Result<Vec<DirectoryMember>, DirectoryError> {
    let groups = self.groups.lock().unwrap();
    let users: BTreeMap<&str, &DirectoryMember> = groups
      .values()
      .flatten()
      .map(|m| (m.id.as_str(), m))
      .collect();
    Ok(users.into_values().cloned().collect())
  }
}

// ─── Platform ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PlatformState {
  next_id:      i64,
  users:        BTreeMap<i64, PlatformUser>,
  /// team id → (org, name)
  teams:        BTreeMap<i64, (i64, String)>,
  team_members: BTreeMap<i64, BTreeMap<i64, TeamRole>>,
  org_members:  BTreeMap<i64, BTreeMap<i64, OrgRole>>,
  external:     BTreeSet<i64>,
  failing:      BTreeSet<&'static str>,
  calls:        Vec<String>,
}

impl PlatformState {
  fn id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }

  fn call(&mut self, op: &'static str, detail: String) -> PlatformResult<()> {
    self.calls.push(format!("{op} {detail}"));
    if self.failing.contains(op) {
      return Err(PlatformError::Status { status: 500, body: format!("{op} failed") });
    }
    Ok(())
  }

  fn user_by_email(&self, email: &str) -> Option<&PlatformUser> {
    let email = normalize_email(email);
    self.users.values().find(|u| normalize_email(&u.email) == email)
  }

  fn team_by_name(&self, org: i64, name: &str) -> Option<i64> {
    self
      .teams
      .iter()
      .find(|(_, (o, n))| *o == org && n.eq_ignore_ascii_case(name.trim()))
      .map(|(id, _)| *id)
  }
}

#[derive(Default)]
pub struct FakePlatform {
  state: Mutex<PlatformState>,
}

impl FakePlatform {
  pub fn add_user(&self, email: &str) -> i64 {
    let mut s = self.state.lock().unwrap();
    let id = s.id();
    s.users.insert(id, PlatformUser {
      id,
      login: email.into(),
      email: email.into(),
      name: email.into(),
    });
    id
  }

  pub fn add_team(&self, org: i64, name: &str) -> i64 {
    let mut s = self.state.lock().unwrap();
    let id = s.id();
    s.teams.insert(id, (org, name.to_owned()));
    id
  }

  pub fn add_org_member(&self, org: i64, user: i64, role: OrgRole) {
    let mut s = self.state.lock().unwrap();
    s.org_members.entry(org).or_default().insert(user, role);
  }

  pub fn add_team_member(&self, team: i64, user: i64, role: TeamRole) {
    let mut s = self.state.lock().unwrap();
    s.team_members.entry(team).or_default().insert(user, role);
  }

  /// Org role changes for `user` report `org.externallySynced`.
  pub fn externally_manage(&self, user: i64) {
    self.state.lock().unwrap().external.insert(user);
  }

  pub fn fail_on(&self, op: &'static str) {
    self.state.lock().unwrap().failing.insert(op);
  }

  pub fn calls(&self) -> Vec<String> { self.state.lock().unwrap().calls.clone() }

  pub fn clear_calls(&self) { self.state.lock().unwrap().calls.clear() }

  pub fn user_id(&self, email: &str) -> Option<i64> {
    self.state.lock().unwrap().user_by_email(email).map(|u| u.id)
  }

  pub fn user_name(&self, id: i64) -> Option<String> {
    self.state.lock().unwrap().users.get(&id).map(|u| u.name.clone())
  }

  pub fn team_id(&self, org: i64, name: &str) -> Option<i64> {
    self.state.lock().unwrap().team_by_name(org, name)
  }

  pub fn team_role(&self, team: i64, user: i64) -> Option<TeamRole> {
    let s = self.state.lock().unwrap();
    s.team_members.get(&team)?.get(&user).copied()
  }

  pub fn org_role(&self, org: i64, user: i64) -> Option<OrgRole> {
    let s = self.state.lock().unwrap();
    s.org_members.get(&org)?.get(&user).copied()
  }
}

impl Platform for FakePlatform {
  async fn search_team(&self, org: i64, name: &str) -> PlatformResult<Option<i64>> {
    let mut s = self.state.lock().unwrap();
    s.call("search_team", name.to_owned())?;
    Ok(s.team_by_name(org, name))
  }

  async fn ensure_team(&self, org: i64, name: &str) -> PlatformResult<i64> {
    let mut s = self.state.lock().unwrap();
    s.call("ensure_team", name.to_owned())?;
    if let Some(id) = s.team_by_name(org, name) {
      return Ok(id);
    }
    let id = s.id();
    s.teams.insert(id, (org, name.to_owned()));
    Ok(id)
  }

  async fn list_teams(&self, org: i64) -> PlatformResult<Vec<Team>> {
    let mut s = self.state.lock().unwrap();
    s.call("list_teams", org.to_string())?;
    Ok(
      s.teams
        .iter()
        .filter(|(_, (o, _))| *o == org)
        .map(|(id, (_, name))| Team { id: *id, name: name.clone() })
        .collect(),
    )
  }

  async fn list_team_members(&self, team_id: i64) -> PlatformResult<Vec<TeamMember>> {
    let mut s = self.state.lock().unwrap();
    s.call("list_team_members", team_id.to_string())?;
    let members = s.team_members.get(&team_id).cloned().unwrap_or_default();
    Ok(
      members
        .into_iter()
        .filter_map(|(uid, role)| {
          let user = s.users.get(&uid)?;
          Some(TeamMember {
            user_id: uid,
            login: user.login.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role,
          })
        })
        .collect(),
    )
  }

  async fn lookup_user(&self, email: &str) -> PlatformResult<Option<PlatformUser>> {
    let mut s = self.state.lock().unwrap();
    s.call("lookup_user", email.to_owned())?;
    Ok(s.user_by_email(email).cloned())
  }

  async fn create_user(&self, user: NewUser) -> PlatformResult<PlatformUser> {
    let mut s = self.state.lock().unwrap();
    s.call("create_user", user.email.clone())?;
    if s.user_by_email(&user.email).is_some() {
      return Err(PlatformError::Conflict(format!("{} exists", user.email)));
    }
    let id = s.id();
    let created = PlatformUser { id, login: user.login, email: user.email, name: user.name };
    s.users.insert(id, created.clone());
    Ok(created)
  }

  async fn add_user_to_org(&self, org: i64, email: &str, role: OrgRole) -> PlatformResult<()> {
    let mut s = self.state.lock().unwrap();
    s.call("add_user_to_org", format!("{org} {email} {role}"))?;
    let uid = s
      .user_by_email(email)
      .map(|u| u.id)
      .ok_or_else(|| PlatformError::NotFound(email.to_owned()))?;
    let members = s.org_members.entry(org).or_default();
    if members.contains_key(&uid) {
      return Err(PlatformError::Conflict("user is already member of this organization".into()));
    }
    members.insert(uid, role);
    Ok(())
  }

  async fn update_user_role(&self, org: i64, user_id: i64, role: OrgRole) -> PlatformResult<()> {
    let mut s = self.state.lock().unwrap();
    s.call("update_user_role", format!("{org} {user_id} {role}"))?;
    if s.external.contains(&user_id) {
      return Err(PlatformError::ExternallyManaged("org.externallySynced".into()));
    }
    match s.org_members.get_mut(&org).and_then(|m| m.get_mut(&user_id)) {
      Some(current) => {
        *current = role;
        Ok(())
      }
      None => Err(PlatformError::NotFound(format!("user {user_id}"))),
    }
  }

  async fn add_user_to_team(&self, team_id: i64, user_id: i64, role: TeamRole) -> PlatformResult<()> {
    let mut s = self.state.lock().unwrap();
    s.call("add_user_to_team", format!("{team_id} {user_id} {role}"))?;
    let members = s.team_members.entry(team_id).or_default();
    if members.contains_key(&user_id) {
      return Err(PlatformError::Conflict("user is already added to this team".into()));
    }
    members.insert(user_id, role);
    Ok(())
  }

  async fn update_team_member_role(
    &self,
    team_id: i64,
    user_id: i64,
    role: TeamRole,
  ) -> PlatformResult<()> {
    let mut s = self.state.lock().unwrap();
    s.call("update_team_member_role", format!("{team_id} {user_id} {role}"))?;
    match s.team_members.get_mut(&team_id).and_then(|m| m.get_mut(&user_id)) {
      Some(current) => {
        *current = role;
        Ok(())
      }
      None => Err(PlatformError::NotFound(format!("member {user_id}"))),
    }
  }

  async fn remove_user_from_team(&self, team_id: i64, user_id: i64) -> PlatformResult<()> {
    let mut s = self.state.lock().unwrap();
    s.call("remove_user_from_team", format!("{team_id} {user_id}"))?;
    match s.team_members.get_mut(&team_id).and_then(|m| m.remove(&user_id)) {
      Some(_) => Ok(()),
      None => Err(PlatformError::NotFound(format!("member {user_id}"))),
    }
  }

  async fn list_org_users(&self, org: i64) -> PlatformResult<Vec<OrgUser>> {
    let mut s = self.state.lock().unwrap();
    s.call("list_org_users", org.to_string())?;
    let members = s.org_members.get(&org).cloned().unwrap_or_default();
    Ok(
      members
        .into_iter()
        .filter_map(|(uid, role)| {
          let user = s.users.get(&uid)?;
          Some(OrgUser {
            user_id: uid,
            login: user.login.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: role.to_string(),
          })
        })
        .collect(),
    )
  }
}
