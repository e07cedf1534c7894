//! [`Syncer`]: the single execution slot around build, persist and apply.

use std::{
  sync::{Mutex, PoisonError},
  time::Instant,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use teamsync_core::{
  directory::{Directory, GroupFilter},
  plan::{NewPlan, Plan, PlanAction, PlanStatus},
  platform::Platform,
  store::{AUTO_SYNC_SETTING, MappingStore},
};
use tokio::sync::MutexGuard;
use tracing::{info, warn};

use crate::{
  ApplyReport, Error, Policy, Result, apply,
  collect::collect,
  plan,
};

/// When the last apply finished and how it went (`"ok"` or the error).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LastRun {
  pub at:      Option<DateTime<Utc>>,
  pub message: String,
}

/// Owns the collaborators and guarantees at most one cycle runs at a time.
///
/// Every entry point takes the slot with `try_lock`; a second caller gets
/// [`Error::Busy`] instead of queueing.
pub struct Syncer<S, P, D> {
  store:             S,
  platform:          P,
  directory:         D,
  policy:            Policy,
  group_filter:      GroupFilter,
  auto_sync_default: bool,
  slot:              tokio::sync::Mutex<()>,
  last_run:          Mutex<LastRun>,
}

impl<S, P, D> Syncer<S, P, D>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  pub fn new(store: S, platform: P, directory: D, policy: Policy) -> Self {
    Self {
      store,
      platform,
      directory,
      policy,
      group_filter: GroupFilter::default(),
      auto_sync_default: true,
      slot: tokio::sync::Mutex::new(()),
      last_run: Mutex::new(LastRun::default()),
    }
  }

  /// Value of the auto-sync toggle while no operator has set it.
  pub fn with_auto_sync_default(mut self, enabled: bool) -> Self {
    self.auto_sync_default = enabled;
    self
  }

  /// Directory groups in scope for mapping purges and the external view.
  pub fn with_group_filter(mut self, filter: GroupFilter) -> Self {
    self.group_filter = filter;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn platform(&self) -> &P { &self.platform }

  pub fn directory(&self) -> &D { &self.directory }

  pub fn policy(&self) -> &Policy { &self.policy }

  pub fn group_filter(&self) -> &GroupFilter { &self.group_filter }

  pub fn last_run(&self) -> LastRun {
    self
      .last_run
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Whether a cycle currently holds the slot.
  pub fn is_running(&self) -> bool { self.slot.try_lock().is_err() }

  fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
    self.slot.try_lock().map_err(|_| Error::Busy)
  }

  // ── Settings ──────────────────────────────────────────────────────────────

  pub async fn auto_sync_enabled(&self) -> Result<bool> {
    let raw = self
      .store
      .get_setting(AUTO_SYNC_SETTING.to_owned())
      .await
      .map_err(Error::store)?;
    Ok(match raw.as_deref().map(str::trim) {
      Some("true") => true,
      Some("false") => false,
      _ => self.auto_sync_default,
    })
  }

  pub async fn set_auto_sync(&self, enabled: bool) -> Result<()> {
    self
      .store
      .set_setting(AUTO_SYNC_SETTING.to_owned(), enabled.to_string())
      .await
      .map_err(Error::store)
  }

  // ── Cycles ────────────────────────────────────────────────────────────────

  /// Build a plan from live state without storing it.
  async fn build(&self) -> Result<NewPlan> {
    let orgs = self.store.list_orgs().await.map_err(Error::store)?;
    let mappings = self.store.list_mappings().await.map_err(Error::store)?;

    let snapshot = collect(&orgs, &mappings, &self.platform, &self.directory).await;
    let actions = plan::build(&snapshot, &self.policy);
    info!(mappings = mappings.len(), actions = actions.len(), "plan built");

    Ok(NewPlan { created_at: Utc::now(), actions })
  }

  /// Build a plan and store it as the current one.
  pub async fn preview(&self) -> Result<Plan> {
    let _slot = self.acquire()?;
    let plan = self.build().await?;
    self.store.replace_plan(plan).await.map_err(Error::store)
  }

  /// Build, store and apply a fresh plan.
  pub async fn run(&self) -> Result<ApplyReport> {
    let _slot = self.acquire()?;
    let started = Instant::now();
    info!("sync starting");

    let result = async {
      let plan = self.build().await?;
      let plan = self.store.replace_plan(plan).await.map_err(Error::store)?;
      self
        .execute(plan.id, plan.actions, PlanStatus::Applying, PlanStatus::Applied)
        .await
    }
    .await;

    self.finish(started, &result);
    result
  }

  /// Apply the stored plan as it is.
  pub async fn apply_current(&self) -> Result<ApplyReport> {
    let _slot = self.acquire()?;
    let started = Instant::now();
    let plan = self.current_plan().await?;

    let result = self
      .execute(plan.id, plan.actions, PlanStatus::Applying, PlanStatus::Applied)
      .await;
    self.finish(started, &result);
    result
  }

  /// Apply only the selectable actions of the stored plan whose ids are in
  /// `ids`.
  pub async fn apply_selected(&self, ids: &[i64]) -> Result<ApplyReport> {
    let _slot = self.acquire()?;
    let started = Instant::now();
    let plan = self.current_plan().await?;

    let selected = plan.select(ids);
    if selected.is_empty() {
      return Err(Error::NothingSelected);
    }

    let result = self
      .execute(
        plan.id,
        selected,
        PlanStatus::ApplyingSelected,
        PlanStatus::AppliedSelected,
      )
      .await;
    self.finish(started, &result);
    result
  }

  pub async fn clear_plan(&self) -> Result<()> {
    let _slot = self.acquire()?;
    self.store.clear_plan().await.map_err(Error::store)
  }

  async fn current_plan(&self) -> Result<Plan> {
    self
      .store
      .latest_plan()
      .await
      .map_err(Error::store)?
      .ok_or(Error::NoPlan)
  }

  async fn execute(
    &self,
    plan_id: i64,
    actions: Vec<PlanAction>,
    running: PlanStatus,
    done: PlanStatus,
  ) -> Result<ApplyReport> {
    self
      .store
      .update_plan_status(plan_id, running)
      .await
      .map_err(Error::store)?;

    match apply(&self.store, &self.platform, actions).await {
      Ok(report) => {
        self
          .store
          .update_plan_status(plan_id, done)
          .await
          .map_err(Error::store)?;
        Ok(report)
      }
      Err(e) => {
        if let Err(status_err) = self
          .store
          .update_plan_status(plan_id, PlanStatus::Failed)
          .await
        {
          warn!(plan = plan_id, error = %status_err, "failed to mark plan failed");
        }
        Err(e)
      }
    }
  }

  fn finish(&self, started: Instant, result: &Result<ApplyReport>) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let message = match result {
      Ok(report) => {
        info!(elapsed_ms, applied = report.applied, skipped = report.skipped, "sync completed");
        "ok".to_owned()
      }
      Err(e) => {
        warn!(elapsed_ms, error = %e, "sync failed");
        e.to_string()
      }
    };

    *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = LastRun {
      at: Some(Utc::now()),
      message,
    };
  }
}

#[cfg(test)]
mod tests {
  use teamsync_core::{
    org::{NewMapping, NewOrg, Org},
    plan::{ActionKind, Change},
    role::{OrgRole, TeamRole},
  };
  use teamsync_store_sqlite::SqliteStore;

  use super::*;
  use crate::fake::{FakeDirectory, FakePlatform};

  type TestSyncer = Syncer<SqliteStore, FakePlatform, FakeDirectory>;

  async fn syncer(policy: Policy) -> TestSyncer {
    let store = SqliteStore::open_in_memory().await.unwrap();
    Syncer::new(store, FakePlatform::default(), FakeDirectory::default(), policy)
  }

  async fn add_org(s: &TestSyncer, platform_org_id: i64, default_role: Option<OrgRole>) -> Org {
    s.store()
      .create_org(NewOrg { platform_org_id, name: format!("org{platform_org_id}"), default_role })
      .await
      .unwrap()
  }

  async fn add_mapping(
    s: &TestSyncer,
    org: &Org,
    team: &str,
    group: &str,
    role_override: Option<OrgRole>,
  ) {
    s.store()
      .create_mapping(NewMapping {
        org_id: org.id,
        team_name: team.into(),
        team_id: None,
        group_id: group.into(),
        group_name: Some(format!("{group} name")),
        team_role: TeamRole::Member,
        role_override,
      })
      .await
      .unwrap();
  }

  fn kinds(plan: &Plan) -> Vec<ActionKind> { plan.actions.iter().map(|a| a.kind()).collect() }

  /// Org 10 (default Viewer) with team "platform" fed by group g1.
  async fn scenario_a(policy: Policy) -> TestSyncer {
    let s = syncer(policy).await;
    let org = add_org(&s, 10, Some(OrgRole::Viewer)).await;
    add_mapping(&s, &org, "platform", "g1", None).await;
    s.platform().add_team(10, "platform");
    s.directory().set_group("g1", &["alice@example.com"]);
    s
  }

  #[tokio::test]
  async fn new_user_is_created_added_to_org_and_team() {
    let s = scenario_a(Policy::default()).await;

    let plan = s.preview().await.unwrap();
    assert_eq!(kinds(&plan), vec![
      ActionKind::CreateUser,
      ActionKind::AddUserToOrg,
      ActionKind::AddUserToTeam,
    ]);
    assert!(matches!(
      &plan.actions[1].change,
      Change::AddUserToOrg { email, role: OrgRole::Viewer, .. } if email == "alice@example.com"
    ));
    assert!(matches!(
      &plan.actions[2].change,
      Change::AddUserToTeam { team, team_role: TeamRole::Member, .. } if team.name == "platform"
    ));
    assert_eq!(plan.status, PlanStatus::Planned);
    assert_eq!(plan.actions[0].note, "mapping: org10/platform <- g1 name (g1)");
  }

  #[tokio::test]
  async fn disabled_creation_yields_only_a_blocked_entry() {
    let s = scenario_a(Policy { allow_create_users: false, ..Policy::default() }).await;

    let plan = s.preview().await.unwrap();
    assert_eq!(kinds(&plan), vec![ActionKind::BlockedCreateUser]);
    assert!(plan.actions[0].note.starts_with("user not found and creation disabled; "));
  }

  #[tokio::test]
  async fn strongest_override_wins_across_mappings() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 20, None).await;
    add_mapping(&s, &org, "editors", "g1", Some(OrgRole::Editor)).await;
    add_mapping(&s, &org, "admins", "g2", Some(OrgRole::Admin)).await;
    s.platform().add_user("bob@example.com");
    s.directory().set_group("g1", &["bob@example.com"]);
    s.directory().set_group("g2", &["bob@example.com"]);

    let plan = s.preview().await.unwrap();
    let org_actions: Vec<&PlanAction> = plan
      .actions
      .iter()
      .filter(|a| matches!(a.kind(), ActionKind::AddUserToOrg | ActionKind::UpdateUserRole))
      .collect();
    assert_eq!(org_actions.len(), 1);
    assert!(matches!(org_actions[0].change, Change::AddUserToOrg { role: OrgRole::Admin, .. }));
    assert!(org_actions[0].note.starts_with("mapping role override: Admin; "));
  }

  #[tokio::test]
  async fn stale_members_are_removed_only_when_allowed() {
    for allow in [true, false] {
      let s = syncer(Policy { allow_remove_members: allow, ..Policy::default() }).await;
      let org = add_org(&s, 10, None).await;
      add_mapping(&s, &org, "platform", "g1", None).await;
      let team = s.platform().add_team(10, "platform");
      let old = s.platform().add_user("old@example.com");
      s.platform().add_org_member(10, old, OrgRole::Viewer);
      s.platform().add_team_member(team, old, TeamRole::Member);
      s.directory().set_group("g1", &[]);

      let plan = s.preview().await.unwrap();
      if allow {
        assert_eq!(kinds(&plan), vec![ActionKind::RemoveUserFromTeam]);
      } else {
        assert!(plan.actions.is_empty());
      }
    }
  }

  #[tokio::test]
  async fn applied_plan_converges() {
    let s = scenario_a(Policy::default()).await;

    let report = s.run().await.unwrap();
    assert_eq!(report, ApplyReport { applied: 3, skipped: 0 });
    assert_eq!(s.store().latest_plan().await.unwrap().unwrap().status, PlanStatus::Applied);
    assert_eq!(s.last_run().message, "ok");

    let again = s.preview().await.unwrap();
    assert!(again.actions.is_empty(), "unexpected actions: {:?}", again.actions);
  }

  #[tokio::test]
  async fn created_team_id_is_cached_on_mappings() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 10, None).await;
    add_mapping(&s, &org, "New Team", "g1", None).await;
    s.directory().set_group("g1", &["zoe@example.com"]);

    s.run().await.unwrap();

    let team_id = s.platform().team_id(10, "new team").unwrap();
    let mappings = s.store().list_mappings().await.unwrap();
    assert_eq!(mappings[0].team_id, Some(team_id));
    let zoe = s.platform().user_id("zoe@example.com").unwrap();
    assert_eq!(s.platform().team_role(team_id, zoe), Some(TeamRole::Member));

    s.platform().clear_calls();
    assert!(s.preview().await.unwrap().actions.is_empty());
    assert!(!s.platform().calls().iter().any(|c| c.starts_with("search_team")));
  }

  #[tokio::test]
  async fn builds_are_deterministic() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 10, None).await;
    add_mapping(&s, &org, "a", "g1", None).await;
    add_mapping(&s, &org, "b", "g2", Some(OrgRole::Editor)).await;
    s.directory().set_group("g1", &["x@example.com", "y@example.com", "z@example.com"]);
    s.directory().set_group("g2", &["z@example.com", "w@example.com"]);

    let first = s.preview().await.unwrap();
    let second = s.preview().await.unwrap();
    let strip = |p: &Plan| -> Vec<(i64, String, Change)> {
      p.actions.iter().map(|a| (a.org_id, a.note.clone(), a.change.clone())).collect()
    };
    assert_eq!(strip(&first), strip(&second));
    let ids: Vec<i64> = second.actions.iter().map(|a| a.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ids, sorted);
  }

  #[tokio::test]
  async fn identity_ignores_case_and_whitespace() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 10, None).await;
    add_mapping(&s, &org, "platform", "g1", None).await;
    let team = s.platform().add_team(10, "Platform");
    let alice = s.platform().add_user("alice@example.com");
    s.platform().add_org_member(10, alice, OrgRole::Viewer);
    s.platform().add_team_member(team, alice, TeamRole::Member);
    s.directory().set_group("g1", &["  Alice@Example.COM "]);

    assert!(s.preview().await.unwrap().actions.is_empty());
  }

  #[tokio::test]
  async fn directory_failure_skips_only_that_mapping() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 10, None).await;
    add_mapping(&s, &org, "broken", "g1", None).await;
    add_mapping(&s, &org, "fine", "g2", None).await;
    s.platform().add_team(10, "fine");
    s.directory().fail_group("g1");
    s.directory().set_group("g2", &["amy@example.com"]);

    let plan = s.preview().await.unwrap();
    assert_eq!(plan.actions[0].kind(), ActionKind::CreateTeam);
    assert!(plan.actions.iter().all(|a| a.change.team_name() != Some("broken")
      || a.kind() == ActionKind::CreateTeam));
    assert!(plan.actions.iter().any(|a| a.kind() == ActionKind::AddUserToTeam));
  }

  #[tokio::test]
  async fn team_listing_failure_skips_only_that_mapping() {
    let s = syncer(Policy::default()).await;
    let org = add_org(&s, 10, None).await;
    add_mapping(&s, &org, "existing", "g1", None).await;
    add_mapping(&s, &org, "fresh", "g2", None).await;
    s.platform().add_team(10, "existing");
    s.platform().fail_on("list_team_members");
    s.directory().set_group("g1", &["ann@example.com"]);
    s.directory().set_group("g2", &["ben@example.com"]);

    let plan = s.preview().await.unwrap();
    assert!(plan.actions.iter().all(|a| a.change.team_name() != Some("existing")));
    assert!(!plan.actions.iter().any(|a| matches!(
      &a.change,
      Change::CreateUser { email, .. } if email == "ann@example.com"
    )));
    assert_eq!(plan.actions[0].kind(), ActionKind::CreateTeam);
    assert!(plan.actions.iter().any(|a| matches!(
      &a.change,
      Change::AddUserToTeam { team, email, .. } if team.name == "fresh" && email == "ben@example.com"
    )));
  }

  #[tokio::test]
  async fn org_listing_failure_still_adds_to_org() {
    let s = scenario_a(Policy::default()).await;
    s.platform().add_user("alice@example.com");
    s.platform().fail_on("list_org_users");

    let plan = s.preview().await.unwrap();
    assert_eq!(kinds(&plan), vec![ActionKind::AddUserToOrg, ActionKind::AddUserToTeam]);
    assert!(plan.actions[0].note.ends_with("; org user lookup failed"), "{}", plan.actions[0].note);
  }

  #[tokio::test]
  async fn selected_apply_runs_only_chosen_actions() {
    let s = scenario_a(Policy::default()).await;
    s.platform().add_user("alice@example.com");

    let plan = s.preview().await.unwrap();
    assert_eq!(kinds(&plan), vec![ActionKind::AddUserToOrg, ActionKind::AddUserToTeam]);

    let org_action = plan.actions[0].id;
    let report = s.apply_selected(&[org_action, 999]).await.unwrap();
    assert_eq!(report.applied, 1);

    let stored = s.store().latest_plan().await.unwrap().unwrap();
    assert_eq!(stored.status, PlanStatus::AppliedSelected);
    let alice = s.platform().user_id("alice@example.com").unwrap();
    assert_eq!(s.platform().org_role(10, alice), Some(OrgRole::Viewer));
    let team = s.platform().team_id(10, "platform").unwrap();
    assert_eq!(s.platform().team_role(team, alice), None);
  }

  #[tokio::test]
  async fn blocked_entries_cannot_be_selected() {
    let s = scenario_a(Policy { allow_create_users: false, ..Policy::default() }).await;
    let plan = s.preview().await.unwrap();

    let err = s.apply_selected(&[plan.actions[0].id]).await.unwrap_err();
    assert!(matches!(err, Error::NothingSelected));
  }

  #[tokio::test]
  async fn apply_without_plan_fails() {
    let s = syncer(Policy::default()).await;
    assert!(matches!(s.apply_current().await.unwrap_err(), Error::NoPlan));
  }

  #[tokio::test]
  async fn failed_apply_marks_plan_failed() {
    let s = scenario_a(Policy::default()).await;
    s.platform().fail_on("create_user");

    let err = s.run().await.unwrap_err();
    assert!(matches!(err, Error::Platform(_)));
    assert_eq!(s.store().latest_plan().await.unwrap().unwrap().status, PlanStatus::Failed);

    let last = s.last_run();
    assert!(last.at.is_some());
    assert!(last.message.contains("create_user failed"));
  }

  #[tokio::test]
  async fn second_cycle_is_rejected_while_busy() {
    let s = scenario_a(Policy::default()).await;

    let held = s.slot.try_lock().unwrap();
    assert!(s.is_running());
    assert!(matches!(s.preview().await.unwrap_err(), Error::Busy));
    assert!(matches!(s.run().await.unwrap_err(), Error::Busy));
    drop(held);

    assert!(s.preview().await.is_ok());
  }

  #[tokio::test]
  async fn auto_sync_falls_back_to_default() {
    let s = syncer(Policy::default()).await.with_auto_sync_default(false);
    assert!(!s.auto_sync_enabled().await.unwrap());

    s.set_auto_sync(true).await.unwrap();
    assert!(s.auto_sync_enabled().await.unwrap());
  }

  #[tokio::test]
  async fn clear_removes_the_plan() {
    let s = scenario_a(Policy::default()).await;
    s.preview().await.unwrap();
    s.clear_plan().await.unwrap();
    assert!(s.store().latest_plan().await.unwrap().is_none());
  }
}
