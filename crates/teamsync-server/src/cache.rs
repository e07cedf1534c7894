//! Advisory snapshot of platform and directory state for operators.
//!
//! Refreshed on a timer and read by `GET /external`. Plan building never
//! looks at it; it exists only so the admin surface can show what the
//! platform and the directory currently hold without hammering either.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use teamsync_core::{
  directory::{Directory, DirectoryGroup, DirectoryMember, GroupFilter},
  platform::{OrgUser, Platform, Team},
  store::MappingStore,
};
use teamsync_engine::Syncer;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A platform org member with the teams they belong to, labelled
/// `"<team> (<role>)"`.
#[derive(Debug, Clone, Serialize)]
pub struct OrgUserView {
  #[serde(flatten)]
  pub user:  OrgUser,
  pub teams: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgSnapshot {
  pub org_id:          i64,
  pub platform_org_id: i64,
  pub name:            String,
  pub teams:           Vec<Team>,
  pub teams_error:     Option<String>,
  pub users:           Vec<OrgUserView>,
  pub users_error:     Option<String>,
}

/// A directory user found in at least one filtered group, with the display
/// names of those groups.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryUserView {
  #[serde(flatten)]
  pub user:   DirectoryMember,
  pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExternalSnapshot {
  /// `None` until the first refresh completes.
  pub refreshed_at: Option<DateTime<Utc>>,
  pub orgs:         Vec<OrgSnapshot>,
  pub orgs_error:   Option<String>,
  /// Only groups passing the configured group filter.
  pub groups:       Vec<DirectoryGroup>,
  pub groups_error: Option<String>,
  pub users:        Vec<DirectoryUserView>,
  pub users_error:  Option<String>,
}

/// Holds the latest [`ExternalSnapshot`]. Concurrent refreshes collapse into
/// the one already in flight.
#[derive(Default)]
pub struct ExternalCache {
  snapshot: RwLock<ExternalSnapshot>,
  inflight: Mutex<()>,
}

impl ExternalCache {
  pub fn new() -> Self { Self::default() }

  pub fn snapshot(&self) -> ExternalSnapshot {
    self
      .snapshot
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// The current snapshot, refreshing inline when none has been taken yet.
  pub async fn get_or_refresh<S, P, D>(&self, syncer: &Syncer<S, P, D>) -> ExternalSnapshot
  where
    S: MappingStore,
    P: Platform,
    D: Directory,
  {
    let current = self.snapshot();
    if current.refreshed_at.is_some() {
      return current;
    }
    self.refresh(syncer).await;
    self.snapshot()
  }

  /// Reload the snapshot. Returns `false` when another refresh was already
  /// running; the caller then waits for that one to finish instead.
  pub async fn refresh<S, P, D>(&self, syncer: &Syncer<S, P, D>) -> bool
  where
    S: MappingStore,
    P: Platform,
    D: Directory,
  {
    let _guard = match self.inflight.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("external refresh already in flight");
        let _wait = self.inflight.lock().await;
        return false;
      }
    };

    let next = load(syncer).await;
    debug!(
      orgs = next.orgs.len(),
      groups = next.groups.len(),
      "external snapshot refreshed"
    );
    *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
    true
  }
}

async fn load<S, P, D>(syncer: &Syncer<S, P, D>) -> ExternalSnapshot
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let mut snapshot = ExternalSnapshot::default();

  match syncer.store().list_orgs().await {
    Ok(orgs) => {
      for org in orgs {
        let (teams, teams_error) = split(syncer.platform().list_teams(org.platform_org_id).await);
        let (users, users_error) =
          split(syncer.platform().list_org_users(org.platform_org_id).await);
        if let Some(e) = teams_error.as_ref().or(users_error.as_ref()) {
          warn!(org = org.platform_org_id, error = %e, "platform state unavailable");
        }
        let labels = team_labels(syncer.platform(), &teams).await;
        let users = users
          .into_iter()
          .map(|user| {
            let teams = labels
              .get(&user.user_id)
              .map(|l| l.iter().cloned().collect())
              .unwrap_or_default();
            OrgUserView { user, teams }
          })
          .collect();
        snapshot.orgs.push(OrgSnapshot {
          org_id: org.id,
          platform_org_id: org.platform_org_id,
          name: org.name,
          teams,
          teams_error,
          users,
          users_error,
        });
      }
    }
    Err(e) => {
      warn!(error = %e, "failed to list orgs for the external snapshot");
      snapshot.orgs_error = Some(e.to_string());
    }
  }

  match syncer.directory().list_groups().await {
    Ok(groups) => {
      let total = groups.len();
      let mut groups = filtered(groups, syncer.group_filter());
      groups.sort_by_key(|g| g.display_name.to_lowercase());
      debug!(filtered = groups.len(), total, "directory groups loaded");
      snapshot.users = directory_users(syncer.directory(), &groups).await;
      snapshot.groups = groups;
    }
    Err(e) => {
      warn!(error = %e, "directory groups unavailable");
      snapshot.groups_error = Some(e.to_string());
      snapshot.users_error = Some(e.to_string());
    }
  }

  snapshot.refreshed_at = Some(Utc::now());
  snapshot
}

fn filtered(groups: Vec<DirectoryGroup>, filter: &GroupFilter) -> Vec<DirectoryGroup> {
  groups
    .into_iter()
    .filter(|g| filter.matches(&g.display_name))
    .collect()
}

/// Team labels per platform user id. Teams whose members cannot be listed
/// are left out.
async fn team_labels<P: Platform>(
  platform: &P,
  teams: &[Team],
) -> BTreeMap<i64, BTreeSet<String>> {
  let mut labels: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
  for team in teams {
    match platform.list_team_members(team.id).await {
      Ok(members) => {
        for member in members {
          labels
            .entry(member.user_id)
            .or_default()
            .insert(format!("{} ({})", team.name, member.role));
        }
      }
      Err(e) => warn!(team = team.id, error = %e, "team member listing failed"),
    }
  }
  labels
}

/// Members of `groups`, once each, sorted by display name. Groups whose
/// members cannot be listed are left out.
async fn directory_users<D: Directory>(
  directory: &D,
  groups: &[DirectoryGroup],
) -> Vec<DirectoryUserView> {
  let mut seen: BTreeMap<String, DirectoryUserView> = BTreeMap::new();
  for group in groups {
    let members = match directory.list_group_members(&group.id).await {
      Ok(members) => members,
      Err(e) => {
        warn!(group = %group.id, error = %e, "group member listing failed");
        continue;
      }
    };
    for member in members.into_iter().filter(|m| !m.id.is_empty()) {
      let view = seen
        .entry(member.id.clone())
        .or_insert_with(|| DirectoryUserView { user: member, groups: Vec::new() });
      if !view.groups.contains(&group.display_name) {
        view.groups.push(group.display_name.clone());
      }
    }
  }
  let mut users: Vec<DirectoryUserView> = seen.into_values().collect();
  users.sort_by_key(|u| u.user.display_name().unwrap_or_default().to_lowercase());
  users
}

fn split<T, E: std::fmt::Display>(res: Result<Vec<T>, E>) -> (Vec<T>, Option<String>) {
  match res {
    Ok(items) => (items, None),
    Err(e) => (Vec::new(), Some(e.to_string())),
  }
}
