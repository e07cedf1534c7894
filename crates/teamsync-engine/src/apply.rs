//! The plan executor.
//!
//! Actions run one at a time in phase order. Known-recoverable platform
//! outcomes (a duplicate membership, a membership that is already gone) count
//! as success; the first other failure aborts the batch. Nothing is rolled
//! back.

use std::collections::HashMap;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use teamsync_core::{
  audit::NewSyncAction,
  plan::{Change, PlanAction, TeamRef, sort_by_phase},
  platform::{NewUser, Platform, PlatformError, PlatformResult},
  store::MappingStore,
};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Outcome of a batch that ran to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
  pub applied: usize,
  pub skipped: usize,
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Ids learned while executing, consulted before any live lookup.
#[derive(Debug, Default)]
struct Resolver {
  teams: HashMap<(i64, String), i64>,
  users: HashMap<String, i64>,
}

impl Resolver {
  fn team_key(org_id: i64, name: &str) -> (i64, String) {
    (org_id, name.trim().to_lowercase())
  }

  fn remember_team(&mut self, org_id: i64, name: &str, id: i64) {
    self.teams.insert(Self::team_key(org_id, name), id);
  }

  fn team(&self, org_id: i64, team: &TeamRef) -> Result<i64> {
    team
      .id
      .or_else(|| self.teams.get(&Self::team_key(org_id, &team.name)).copied())
      .ok_or_else(|| Error::UnresolvedTeam { team: team.name.clone() })
  }
}

/// 16 random bytes from the OS, hex-encoded.
fn random_password() -> String {
  let mut buf = [0u8; 16];
  OsRng.fill_bytes(&mut buf);
  hex::encode(buf)
}

/// Treat `tolerated` outcomes as success.
fn tolerate(
  result: PlatformResult<()>,
  tolerated: fn(&PlatformError) -> bool,
) -> PlatformResult<()> {
  match result {
    Err(e) if tolerated(&e) => {
      debug!(error = %e, "tolerated platform outcome");
      Ok(())
    }
    other => other,
  }
}

fn is_conflict(e: &PlatformError) -> bool { matches!(e, PlatformError::Conflict(_)) }

fn is_not_found(e: &PlatformError) -> bool { matches!(e, PlatformError::NotFound(_)) }

// ─── Executor ────────────────────────────────────────────────────────────────

struct Executor<'a, S, P> {
  store:    &'a S,
  platform: &'a P,
  resolver: Resolver,
}

enum Outcome {
  Applied,
  Skipped,
}

impl<'a, S, P> Executor<'a, S, P>
where
  S: MappingStore,
  P: Platform,
{
  /// Payload id, else an id learned earlier in this batch, else a live
  /// lookup. `None` if the platform does not know the user.
  async fn user_id(&mut self, user_id: Option<i64>, email: &str) -> Result<Option<i64>> {
    if let Some(id) = user_id.or_else(|| self.resolver.users.get(email).copied()) {
      return Ok(Some(id));
    }
    let found = self.platform.lookup_user(email).await?.map(|u| u.id);
    if let Some(id) = found {
      self.resolver.users.insert(email.to_owned(), id);
    }
    Ok(found)
  }

  async fn run(&mut self, action: &PlanAction) -> Result<Outcome> {
    let org = action.platform_org_id;

    match &action.change {
      Change::CreateTeam { team_name, .. } => {
        let id = self.platform.ensure_team(org, team_name).await?;
        self.resolver.remember_team(action.org_id, team_name, id);
        self
          .store
          .update_mapping_team_id_for_name(action.org_id, team_name.clone(), id)
          .await
          .map_err(Error::store)?;
      }

      Change::CreateUser { email, display_name, .. } => {
        let name = if display_name.trim().is_empty() { email } else { display_name };
        let user = self
          .platform
          .create_user(NewUser {
            email:    email.clone(),
            login:    email.clone(),
            name:     name.clone(),
            password: random_password(),
          })
          .await?;
        self.resolver.users.insert(email.clone(), user.id);
      }

      Change::AddUserToOrg { email, role, .. } => {
        tolerate(self.platform.add_user_to_org(org, email, *role).await, is_conflict)?;
      }

      Change::UpdateUserRole { user_id, email, role } => {
        if let Some(id) = self.user_id(*user_id, email).await? {
          match self.platform.update_user_role(org, id, *role).await {
            Err(PlatformError::ExternallyManaged(msg)) => {
              warn!(%email, reason = %msg, "org role is externally managed; skipping");
              return Ok(Outcome::Skipped);
            }
            other => tolerate(other, is_not_found)?,
          }
        }
      }

      Change::AddUserToTeam { team, user_id, email, team_role, .. } => {
        let team_id = self.resolver.team(action.org_id, team)?;
        if let Some(id) = self.user_id(*user_id, email).await? {
          tolerate(
            self.platform.add_user_to_team(team_id, id, *team_role).await,
            is_conflict,
          )?;
        }
      }

      Change::UpdateTeamRole { team, user_id, email, team_role, .. } => {
        let team_id = self.resolver.team(action.org_id, team)?;
        if let Some(id) = self.user_id(*user_id, email).await? {
          tolerate(
            self.platform.update_team_member_role(team_id, id, *team_role).await,
            is_not_found,
          )?;
        }
      }

      Change::RemoveUserFromTeam { team, user_id, email, .. } => {
        let team_id = self.resolver.team(action.org_id, team)?;
        if let Some(id) = self.user_id(*user_id, email).await? {
          tolerate(self.platform.remove_user_from_team(team_id, id).await, is_not_found)?;
        }
      }

      Change::BlockedCreateUser { .. } => return Ok(Outcome::Skipped),
    }

    Ok(Outcome::Applied)
  }

  /// Append `action` to the audit ledger. A write failure stops the batch.
  async fn record(&self, action: &PlanAction) -> Result<()> {
    let entry = NewSyncAction::from_action(action, Utc::now());
    self.store.record_sync_action(entry).await.map_err(Error::store)?;
    Ok(())
  }
}

/// Execute `actions` against `platform`, recording each applied one in
/// `store`'s audit ledger.
pub async fn apply<S, P>(store: &S, platform: &P, mut actions: Vec<PlanAction>) -> Result<ApplyReport>
where
  S: MappingStore,
  P: Platform,
{
  sort_by_phase(&mut actions);

  let mut executor = Executor { store, platform, resolver: Resolver::default() };
  let mut report = ApplyReport::default();

  for action in &actions {
    debug!(id = action.id, kind = %action.kind(), "executing action");
    match executor.run(action).await? {
      Outcome::Applied => {
        executor.record(action).await?;
        report.applied += 1;
      }
      Outcome::Skipped => report.skipped += 1,
    }
  }

  info!(applied = report.applied, skipped = report.skipped, "plan applied");
  Ok(report)
}
