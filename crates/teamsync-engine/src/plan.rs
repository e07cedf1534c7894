//! The plan builder: collected state in, ordered actions out.
//!
//! Building is a pure function of a [`Snapshot`] and a [`Policy`]. All
//! accumulation happens in ordered maps, so the same snapshot always yields
//! the same action list, and a snapshot taken after a fully applied plan
//! yields none.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use teamsync_core::{
  org::{Mapping, Org},
  plan::{Change, PlanAction, TeamRef, sort_by_phase},
  role::{OrgRole, TeamRole},
};

use crate::collect::{MappingState, Snapshot, UserLookup};

// ─── Policy ──────────────────────────────────────────────────────────────────

/// Service-wide knobs that shape a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
  /// Org role used when neither the mapping nor the org names one.
  pub default_role:         OrgRole,
  pub allow_create_users:   bool,
  pub allow_remove_members: bool,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      default_role:         OrgRole::Viewer,
      allow_create_users:   true,
      allow_remove_members: true,
    }
  }
}

// ─── Notes ───────────────────────────────────────────────────────────────────

/// `mapping: <org>/<team> <- <group name> (<group id>)`
pub fn mapping_note(org: &Org, mapping: &Mapping) -> String {
  format!(
    "mapping: {}/{} <- {}",
    org.label(),
    mapping.team_label(),
    mapping.group_label()
  )
}

/// Join two note fragments with `"; "`, dropping empty ones.
pub fn append_note(base: &str, addition: &str) -> String {
  let (base, addition) = (base.trim(), addition.trim());
  match (base.is_empty(), addition.is_empty()) {
    (_, true) => base.to_owned(),
    (true, false) => addition.to_owned(),
    (false, false) => format!("{base}; {addition}"),
  }
}

/// The org role a mapping grants and a note naming where it came from.
fn org_role_for(mapping: &Mapping, org: &Org, policy: &Policy) -> (OrgRole, String) {
  if let Some(role) = mapping.role_override {
    (role, format!("mapping role override: {role}"))
  } else if let Some(role) = org.default_role {
    (role, format!("org default role: {role}"))
  } else {
    let role = policy.default_role;
    (role, format!("service default role: {role}"))
  }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// `(internal org id, lower-cased team name)`
type TeamKey = (i64, String);

fn team_key(org_id: i64, team_name: &str) -> TeamKey {
  (org_id, team_name.trim().to_lowercase())
}

struct RoleClaim {
  role: OrgRole,
  note: String,
}

/// Facts derived from the whole snapshot before any action is emitted.
struct Context<'s> {
  snapshot:   &'s Snapshot,
  orgs:       BTreeMap<i64, &'s Org>,
  /// Strongest team role requested per team and email.
  team_roles: BTreeMap<TeamKey, BTreeMap<&'s str, TeamRole>>,
  /// Teams that some mapping could not collect; nobody is removed from them.
  incomplete: BTreeSet<TeamKey>,
}

impl<'s> Context<'s> {
  fn new(snapshot: &'s Snapshot) -> Self {
    let mut ctx = Self {
      snapshot,
      orgs: BTreeMap::new(),
      team_roles: BTreeMap::new(),
      incomplete: BTreeSet::new(),
    };

    for state in &snapshot.mappings {
      ctx.orgs.insert(state.org.id, &state.org);
      let key = team_key(state.org.id, &state.mapping.team_name);
      let Some(delta) = &state.delta else {
        ctx.incomplete.insert(key);
        continue;
      };
      let roles = ctx.team_roles.entry(key).or_default();
      for email in delta.want.keys() {
        let role = roles.entry(email.as_str()).or_default();
        *role = (*role).max(state.mapping.team_role);
      }
    }
    ctx
  }

  /// `None` when the email is not wanted in that team by any mapping.
  fn team_role(&self, key: &TeamKey, email: &str) -> Option<TeamRole> {
    self.team_roles.get(key)?.get(email).copied()
  }
}

struct Builder<'p> {
  policy:        &'p Policy,
  actions:       Vec<PlanAction>,
  teams_created: BTreeSet<TeamKey>,
  users_created: BTreeSet<String>,
  team_adds:     BTreeMap<(TeamKey, String), usize>,
  team_updates:  BTreeSet<(TeamKey, String)>,
  team_removes:  BTreeSet<(TeamKey, String)>,
  org_roles:     BTreeMap<i64, BTreeMap<String, RoleClaim>>,
}

impl<'p> Builder<'p> {
  fn new(policy: &'p Policy) -> Self {
    Self {
      policy,
      actions: Vec::new(),
      teams_created: BTreeSet::new(),
      users_created: BTreeSet::new(),
      team_adds: BTreeMap::new(),
      team_updates: BTreeSet::new(),
      team_removes: BTreeSet::new(),
      org_roles: BTreeMap::new(),
    }
  }

  fn push(&mut self, org: &Org, note: String, change: Change) -> usize {
    self.actions.push(PlanAction {
      id: 0,
      org_id: org.id,
      platform_org_id: org.platform_org_id,
      note,
      change,
    });
    self.actions.len() - 1
  }

  fn mapping(&mut self, ctx: &Context<'_>, state: &MappingState) {
    let MappingState { mapping, org, team_id, delta } = state;
    let note = mapping_note(org, mapping);
    let key = team_key(org.id, &mapping.team_name);
    let team = TeamRef { id: *team_id, name: mapping.team_name.clone() };

    if team_id.is_none() && self.teams_created.insert(key.clone()) {
      self.push(org, note.clone(), Change::CreateTeam {
        team_name: mapping.team_name.clone(),
        team_role: mapping.team_role,
        group_id:  mapping.group_id.clone(),
      });
    }

    let Some(delta) = delta else { return };
    let (role, source) = org_role_for(mapping, org, self.policy);

    for (email, member) in &delta.want {
      let lookup = match ctx.snapshot.users.get(email) {
        None | Some(UserLookup::Failed) => continue,
        Some(lookup) => lookup,
      };

      if *lookup == UserLookup::Missing {
        let display_name = member.display_name().unwrap_or(email.as_str()).to_owned();
        if !self.policy.allow_create_users {
          self.push(
            org,
            append_note("user not found and creation disabled", &note),
            Change::BlockedCreateUser {
              email: email.clone(),
              display_name,
              role,
              team: team.clone(),
              group_id: mapping.group_id.clone(),
            },
          );
          continue;
        }
        if self.users_created.insert(email.clone()) {
          self.push(org, note.clone(), Change::CreateUser {
            email: email.clone(),
            display_name,
            role,
            team: team.clone(),
            group_id: mapping.group_id.clone(),
          });
        }
      }

      self.claim_org_role(org.id, email, role, append_note(&source, &note));

      let team_role = ctx.team_role(&key, email).unwrap_or_default();
      match delta.have.get(email) {
        None => self.add_to_team(org, &note, &key, &team, email, lookup, team_role, role, mapping),
        Some(existing) => {
          if team_role == TeamRole::Admin
            && existing.role != TeamRole::Admin
            && self.team_updates.insert((key.clone(), email.clone()))
          {
            self.push(org, note.clone(), Change::UpdateTeamRole {
              team: team.clone(),
              user_id: lookup.id().or(Some(existing.user_id)),
              email: email.clone(),
              team_role,
              group_id: mapping.group_id.clone(),
            });
          }
        }
      }
    }

    if !self.policy.allow_remove_members || ctx.incomplete.contains(&key) {
      return;
    }
    for (email, member) in &delta.have {
      if ctx.team_role(&key, email).is_some() {
        continue;
      }
      if self.team_removes.insert((key.clone(), email.clone())) {
        self.push(org, note.clone(), Change::RemoveUserFromTeam {
          team: team.clone(),
          user_id: Some(member.user_id),
          email: email.clone(),
          group_id: mapping.group_id.clone(),
        });
      }
    }
  }

  /// One pending add per team and email; a later mapping only upgrades its
  /// team role.
  #[allow(clippy::too_many_arguments)]
  fn add_to_team(
    &mut self,
    org: &Org,
    note: &str,
    key: &TeamKey,
    team: &TeamRef,
    email: &str,
    lookup: &UserLookup,
    team_role: TeamRole,
    role: OrgRole,
    mapping: &Mapping,
  ) {
    let add_key = (key.clone(), email.to_owned());
    if let Some(&idx) = self.team_adds.get(&add_key) {
      if let Change::AddUserToTeam { team_role: pending, .. } = &mut self.actions[idx].change {
        *pending = (*pending).max(team_role);
      }
      return;
    }
    let idx = self.push(org, note.to_owned(), Change::AddUserToTeam {
      team: team.clone(),
      user_id: lookup.id(),
      email: email.to_owned(),
      team_role,
      role,
      group_id: mapping.group_id.clone(),
    });
    self.team_adds.insert(add_key, idx);
  }

  /// Record that `email` needs at least `role` in the org; the strongest
  /// claim wins and carries its note.
  fn claim_org_role(&mut self, org_id: i64, email: &str, role: OrgRole, note: String) {
    let claims = self.org_roles.entry(org_id).or_default();
    match claims.get_mut(email) {
      Some(claim) if role <= claim.role => {}
      Some(claim) => *claim = RoleClaim { role, note },
      None => {
        claims.insert(email.to_owned(), RoleClaim { role, note });
      }
    }
  }

  fn org_roles(&mut self, ctx: &Context<'_>) {
    let org_roles = std::mem::take(&mut self.org_roles);
    for (org_id, claims) in &org_roles {
      let Some(org) = ctx.orgs.get(org_id).copied() else { continue };
      let members = ctx.snapshot.org_users.get(org_id).and_then(Option::as_ref);

      for (email, claim) in claims {
        let user_id = ctx.snapshot.users.get(email).and_then(UserLookup::id);
        match members.and_then(|m| m.get(email)) {
          None => {
            let note = if members.is_none() {
              append_note(&claim.note, "org user lookup failed")
            } else {
              claim.note.clone()
            };
            self.push(org, note, Change::AddUserToOrg {
              user_id,
              email: email.clone(),
              role: claim.role,
            });
          }
          Some(existing) if !claim.role.matches(&existing.role) => {
            self.push(
              org,
              append_note(&claim.note, &format!("current role: {}", existing.role)),
              Change::UpdateUserRole {
                user_id: user_id.or(Some(existing.user_id)),
                email: email.clone(),
                role: claim.role,
              },
            );
          }
          Some(_) => {}
        }
      }
    }
  }

  fn finish(mut self) -> Vec<PlanAction> {
    sort_by_phase(&mut self.actions);
    for (id, action) in (1..).zip(self.actions.iter_mut()) {
      action.id = id;
    }
    self.actions
  }
}

/// Diff `snapshot` into phase-ordered actions with ids `1..=n`.
pub fn build(snapshot: &Snapshot, policy: &Policy) -> Vec<PlanAction> {
  let ctx = Context::new(snapshot);
  let mut builder = Builder::new(policy);
  for state in &snapshot.mappings {
    builder.mapping(&ctx, state);
  }
  builder.org_roles(&ctx);
  builder.finish()
}

#[cfg(test)]
mod tests {
  use teamsync_core::{
    directory::DirectoryMember,
    platform::{OrgUser, PlatformUser, TeamMember},
    plan::ActionKind,
  };

  use super::*;
  use crate::collect::Delta;

  fn org(id: i64, name: &str, default_role: Option<OrgRole>) -> Org {
    Org { id, platform_org_id: id * 10, name: name.into(), default_role }
  }

  fn mapping(id: i64, org_id: i64, team: &str, group: &str) -> Mapping {
    Mapping {
      id,
      org_id,
      team_name: team.into(),
      team_id: Some(100 + id),
      group_id: group.into(),
      group_name: Some(format!("{group}-name")),
      team_role: TeamRole::Member,
      role_override: None,
    }
  }

  fn member(email: &str) -> (String, DirectoryMember) {
    (email.to_owned(), DirectoryMember {
      id:                  format!("id-{email}"),
      display_name:        None,
      mail:                Some(email.into()),
      user_principal_name: None,
    })
  }

  fn team_member(email: &str, user_id: i64, role: TeamRole) -> (String, TeamMember) {
    (email.to_owned(), TeamMember {
      user_id,
      login: email.into(),
      email: email.into(),
      name: email.into(),
      role,
    })
  }

  fn state(org: &Org, mapping: Mapping, want: &[&str], have: &[(&str, TeamRole)]) -> MappingState {
    MappingState {
      team_id: mapping.team_id,
      org: org.clone(),
      delta: Some(Delta {
        want: want.iter().map(|e| member(e)).collect(),
        have: have
          .iter()
          .enumerate()
          .map(|(i, (e, r))| team_member(e, i as i64 + 500, *r))
          .collect(),
      }),
      mapping,
    }
  }

  fn found(email: &str, id: i64) -> (String, UserLookup) {
    (email.to_owned(), UserLookup::Found(PlatformUser {
      id,
      login: email.into(),
      email: email.into(),
      name: email.into(),
    }))
  }

  fn org_user(email: &str, user_id: i64, role: &str) -> (String, OrgUser) {
    (email.to_owned(), OrgUser {
      user_id,
      login: email.into(),
      email: email.into(),
      name: email.into(),
      role: role.into(),
    })
  }

  fn kinds(actions: &[PlanAction]) -> Vec<ActionKind> {
    actions.iter().map(PlanAction::kind).collect()
  }

  #[test]
  fn notes_join_and_label() {
    assert_eq!(append_note("a", "b"), "a; b");
    assert_eq!(append_note(" ", "b"), "b");
    assert_eq!(append_note("a", ""), "a");

    let o = org(1, "", None);
    let m = mapping(1, 1, "platform", "g1");
    assert_eq!(mapping_note(&o, &m), "mapping: org 1/platform <- g1-name (g1)");
  }

  #[test]
  fn role_source_precedence() {
    let policy = Policy::default();
    let mut m = mapping(1, 1, "t", "g");
    let o = org(1, "o", Some(OrgRole::Editor));

    assert_eq!(org_role_for(&m, &o, &policy).0, OrgRole::Editor);
    assert_eq!(
      org_role_for(&m, &org(1, "o", None), &policy).1,
      "service default role: Viewer"
    );
    m.role_override = Some(OrgRole::Admin);
    assert_eq!(
      org_role_for(&m, &o, &policy),
      (OrgRole::Admin, "mapping role override: Admin".into())
    );
  }

  #[test]
  fn missing_team_is_created_even_when_directory_fails() {
    let o = org(1, "main", None);
    let mut m = mapping(1, 1, "platform", "g1");
    m.team_id = None;
    let snapshot = Snapshot {
      mappings: vec![MappingState { mapping: m, org: o, team_id: None, delta: None }],
      ..Snapshot::default()
    };

    let actions = build(&snapshot, &Policy::default());
    assert_eq!(kinds(&actions), vec![ActionKind::CreateTeam]);
    assert_eq!(actions[0].id, 1);
  }

  #[test]
  fn team_admin_dominates_across_mappings() {
    let o = org(1, "main", None);
    let member_map = mapping(1, 1, "Platform", "g1");
    let mut admin_map = mapping(2, 1, "platform", "g2");
    admin_map.team_id = member_map.team_id;
    admin_map.team_role = TeamRole::Admin;

    let snapshot = Snapshot {
      mappings: vec![
        state(&o, member_map, &["bob@example.com"], &[]),
        state(&o, admin_map, &["bob@example.com"], &[]),
      ],
      users: [found("bob@example.com", 7)].into_iter().collect(),
      org_users: [(1, Some([org_user("bob@example.com", 7, "Viewer")].into_iter().collect()))]
        .into_iter()
        .collect(),
    };

    let actions = build(&snapshot, &Policy::default());
    assert_eq!(kinds(&actions), vec![ActionKind::AddUserToTeam]);
    assert!(matches!(
      actions[0].change,
      Change::AddUserToTeam { team_role: TeamRole::Admin, user_id: Some(7), .. }
    ));
  }

  #[test]
  fn existing_member_is_promoted_once() {
    let o = org(1, "main", None);
    let mut a = mapping(1, 1, "platform", "g1");
    a.team_role = TeamRole::Admin;
    let mut b = mapping(2, 1, "platform", "g2");
    b.team_id = a.team_id;
    b.team_role = TeamRole::Admin;
    let have = [("carol@example.com", TeamRole::Member)];

    let snapshot = Snapshot {
      mappings: vec![
        state(&o, a, &["carol@example.com"], &have),
        state(&o, b, &["carol@example.com"], &have),
      ],
      users: [found("carol@example.com", 9)].into_iter().collect(),
      org_users: [(1, Some([org_user("carol@example.com", 9, "viewer")].into_iter().collect()))]
        .into_iter()
        .collect(),
    };

    let actions = build(&snapshot, &Policy::default());
    assert_eq!(kinds(&actions), vec![ActionKind::UpdateTeamRole]);
  }

  #[test]
  fn existing_admin_is_left_alone() {
    let o = org(1, "main", None);
    let mut m = mapping(1, 1, "platform", "g1");
    m.team_role = TeamRole::Admin;
    let snapshot = Snapshot {
      mappings: vec![state(&o, m, &["carol@example.com"], &[(
        "carol@example.com",
        TeamRole::Admin,
      )])],
      users: [found("carol@example.com", 9)].into_iter().collect(),
      org_users: [(1, Some([org_user("carol@example.com", 9, "Viewer")].into_iter().collect()))]
        .into_iter()
        .collect(),
    };

    assert!(build(&snapshot, &Policy::default()).is_empty());
  }

  #[test]
  fn org_role_update_names_the_current_role() {
    let o = org(1, "main", Some(OrgRole::Editor));
    let snapshot = Snapshot {
      mappings: vec![state(&o, mapping(1, 1, "platform", "g1"), &["dan@example.com"], &[(
        "dan@example.com",
        TeamRole::Member,
      )])],
      users: [found("dan@example.com", 4)].into_iter().collect(),
      org_users: [(1, Some([org_user("dan@example.com", 4, "Viewer")].into_iter().collect()))]
        .into_iter()
        .collect(),
    };

    let actions = build(&snapshot, &Policy::default());
    assert_eq!(kinds(&actions), vec![ActionKind::UpdateUserRole]);
    assert_eq!(
      actions[0].note,
      "org default role: Editor; mapping: main/platform <- g1-name (g1); current role: Viewer"
    );
    assert!(matches!(
      actions[0].change,
      Change::UpdateUserRole { role: OrgRole::Editor, user_id: Some(4), .. }
    ));
  }

  #[test]
  fn failed_org_listing_still_adds_with_flag() {
    let o = org(1, "main", None);
    let snapshot = Snapshot {
      mappings: vec![state(&o, mapping(1, 1, "platform", "g1"), &["eve@example.com"], &[(
        "eve@example.com",
        TeamRole::Member,
      )])],
      users: [found("eve@example.com", 3)].into_iter().collect(),
      org_users: [(1, None)].into_iter().collect(),
    };

    let actions = build(&snapshot, &Policy::default());
    assert_eq!(kinds(&actions), vec![ActionKind::AddUserToOrg]);
    assert!(actions[0].note.ends_with("; org user lookup failed"));
  }

  #[test]
  fn failed_user_lookup_skips_email() {
    let o = org(1, "main", None);
    let snapshot = Snapshot {
      mappings: vec![state(&o, mapping(1, 1, "platform", "g1"), &["x@example.com"], &[])],
      users: [("x@example.com".to_owned(), UserLookup::Failed)].into_iter().collect(),
      org_users: [(1, Some(BTreeMap::new()))].into_iter().collect(),
    };
    assert!(build(&snapshot, &Policy::default()).is_empty());
  }

  #[test]
  fn nobody_is_removed_from_a_partially_collected_team() {
    let o = org(1, "main", None);
    let complete = state(&o, mapping(1, 1, "platform", "g1"), &[], &[(
      "old@example.com",
      TeamRole::Member,
    )]);
    let mut broken = mapping(2, 1, "platform", "g2");
    broken.team_id = complete.team_id;
    let snapshot = Snapshot {
      mappings: vec![complete, MappingState {
        team_id: broken.team_id,
        org: o.clone(),
        delta: None,
        mapping: broken,
      }],
      ..Snapshot::default()
    };

    assert!(build(&snapshot, &Policy::default()).is_empty());
  }

  #[test]
  fn member_wanted_by_a_sibling_mapping_is_kept() {
    let o = org(1, "main", None);
    let a = mapping(1, 1, "platform", "g1");
    let mut b = mapping(2, 1, "platform", "g2");
    b.team_id = a.team_id;
    let have = [("fay@example.com", TeamRole::Member)];

    let snapshot = Snapshot {
      mappings: vec![state(&o, a, &[], &have), state(&o, b, &["fay@example.com"], &have)],
      users: [found("fay@example.com", 2)].into_iter().collect(),
      org_users: [(1, Some([org_user("fay@example.com", 2, "Viewer")].into_iter().collect()))]
        .into_iter()
        .collect(),
    };

    assert!(build(&snapshot, &Policy::default()).is_empty());
  }
}
