//! Desired/actual state collection.
//!
//! Everything the plan builder needs from the directory and the platform is
//! fetched here, up front, so that building a plan is a pure function of the
//! resulting [`Snapshot`]. Individual failures are logged and narrow the
//! snapshot; they never abort collection. Nothing is ever created here.

use std::collections::{BTreeMap, BTreeSet};

use teamsync_core::{
  directory::{Directory, DirectoryMember},
  identity::normalize_email,
  org::{Mapping, Org},
  platform::{OrgUser, Platform, PlatformUser, TeamMember},
};
use tracing::{debug, warn};

/// Membership on both sides of one mapping, keyed by normalised email.
#[derive(Debug, Clone, Default)]
pub struct Delta {
  /// Directory group members: who should be in the team.
  pub want: BTreeMap<String, DirectoryMember>,
  /// Current platform team members.
  pub have: BTreeMap<String, TeamMember>,
}

/// One mapping together with what was learned about it.
#[derive(Debug, Clone)]
pub struct MappingState {
  pub mapping: Mapping,
  pub org:     Org,
  /// Cached or looked-up team id; `None` when the team does not exist yet
  /// or the lookup failed.
  pub team_id: Option<i64>,
  /// `None` when the directory or the team listing could not be read.
  pub delta:   Option<Delta>,
}

/// Result of looking a user up on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
  Found(PlatformUser),
  Missing,
  Failed,
}

impl UserLookup {
  pub fn id(&self) -> Option<i64> {
    match self {
      Self::Found(user) => Some(user.id),
      Self::Missing | Self::Failed => None,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  /// In mapping order.
  pub mappings:  Vec<MappingState>,
  /// One lookup per wanted email.
  pub users:     BTreeMap<String, UserLookup>,
  /// Org members per internal org id; `None` when the listing failed.
  pub org_users: BTreeMap<i64, Option<BTreeMap<String, OrgUser>>>,
}

/// Gather the state of every mapping whose org exists.
pub async fn collect<P, D>(
  orgs: &[Org],
  mappings: &[Mapping],
  platform: &P,
  directory: &D,
) -> Snapshot
where
  P: Platform,
  D: Directory,
{
  let orgs_by_id: BTreeMap<i64, &Org> = orgs.iter().map(|o| (o.id, o)).collect();
  let mut snapshot = Snapshot::default();

  for mapping in mappings {
    let Some(org) = orgs_by_id.get(&mapping.org_id) else {
      warn!(
        mapping = mapping.id,
        org = mapping.org_id,
        "mapping references missing org; skipping"
      );
      continue;
    };

    let team_id = resolve_team(platform, org, mapping).await;
    let delta = collect_delta(platform, directory, mapping, team_id).await;

    if let Some(delta) = &delta {
      for email in delta.want.keys() {
        if snapshot.users.contains_key(email) {
          continue;
        }
        let lookup = match platform.lookup_user(email).await {
          Ok(Some(user)) => UserLookup::Found(user),
          Ok(None) => UserLookup::Missing,
          Err(e) => {
            warn!(%email, error = %e, "user lookup failed");
            UserLookup::Failed
          }
        };
        snapshot.users.insert(email.clone(), lookup);
      }
    }

    snapshot.mappings.push(MappingState {
      mapping: mapping.clone(),
      org: (*org).clone(),
      team_id,
      delta,
    });
  }

  let referenced: BTreeSet<i64> = snapshot.mappings.iter().map(|s| s.org.id).collect();
  for org_id in referenced {
    let Some(org) = orgs_by_id.get(&org_id) else { continue };
    let users = match platform.list_org_users(org.platform_org_id).await {
      Ok(users) => Some(
        users
          .into_iter()
          .filter_map(|u| {
            let email = normalize_email(&u.email);
            (!email.is_empty()).then_some((email, u))
          })
          .collect(),
      ),
      Err(e) => {
        warn!(org = org.platform_org_id, error = %e, "org user listing failed");
        None
      }
    };
    snapshot.org_users.insert(org_id, users);
  }

  snapshot
}

async fn resolve_team<P: Platform>(platform: &P, org: &Org, mapping: &Mapping) -> Option<i64> {
  if let Some(id) = mapping.team_id {
    return Some(id);
  }
  match platform
    .search_team(org.platform_org_id, &mapping.team_name)
    .await
  {
    Ok(found) => found,
    Err(e) => {
      warn!(team = %mapping.team_name, error = %e, "team search failed; treating as absent");
      None
    }
  }
}

async fn collect_delta<P, D>(
  platform: &P,
  directory: &D,
  mapping: &Mapping,
  team_id: Option<i64>,
) -> Option<Delta>
where
  P: Platform,
  D: Directory,
{
  let members = match directory.list_group_members(&mapping.group_id).await {
    Ok(members) => members,
    Err(e) => {
      warn!(group = %mapping.group_id, error = %e, "group member listing failed; skipping mapping");
      return None;
    }
  };

  let mut delta = Delta::default();
  for member in members {
    match member.email() {
      Some(email) => {
        delta.want.entry(email).or_insert(member);
      }
      None => debug!(member = %member.id, "directory member has no mail; ignored"),
    }
  }

  if let Some(team_id) = team_id {
    let members = match platform.list_team_members(team_id).await {
      Ok(members) => members,
      Err(e) => {
        warn!(team = team_id, error = %e, "team member listing failed; skipping mapping");
        return None;
      }
    };
    for member in members {
      let email = normalize_email(&member.email);
      if !email.is_empty() {
        delta.have.insert(email, member);
      }
    }
  }

  Some(delta)
}
