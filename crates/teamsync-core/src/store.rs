//! The `MappingStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `teamsync-store-sqlite`).
//! The engine and the admin API depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  audit::{NewSyncAction, SyncAction},
  org::{Mapping, NewMapping, NewOrg, Org},
  plan::{NewPlan, Plan, PlanStatus},
};

/// Settings key holding `"true"`/`"false"` for scheduled runs.
pub const AUTO_SYNC_SETTING: &str = "auto_sync_enabled";

/// Durable state: orgs, mappings, the current plan, the audit ledger and
/// operator settings.
///
/// Every write that touches more than one row (plan replacement, plan
/// clearing) is a single transaction. Failures are always surfaced; no write
/// is silently dropped.
pub trait MappingStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Orgs ──────────────────────────────────────────────────────────────

  fn list_orgs(&self) -> impl Future<Output = Result<Vec<Org>, Self::Error>> + Send + '_;

  fn create_org(
    &self,
    org: NewOrg,
  ) -> impl Future<Output = Result<Org, Self::Error>> + Send + '_;

  /// Returns `false` if no org had that id. Mappings that referenced it are
  /// left in place and skipped by the engine.
  fn delete_org(&self, id: i64) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Mappings ──────────────────────────────────────────────────────────

  fn list_mappings(
    &self,
  ) -> impl Future<Output = Result<Vec<Mapping>, Self::Error>> + Send + '_;

  fn get_mapping(
    &self,
    id: i64,
  ) -> impl Future<Output = Result<Option<Mapping>, Self::Error>> + Send + '_;

  fn create_mapping(
    &self,
    mapping: NewMapping,
  ) -> impl Future<Output = Result<Mapping, Self::Error>> + Send + '_;

  /// Replace every field of an existing mapping. `None` if it does not exist.
  fn update_mapping(
    &self,
    id: i64,
    mapping: NewMapping,
  ) -> impl Future<Output = Result<Option<Mapping>, Self::Error>> + Send + '_;

  fn delete_mapping(&self, id: i64)
  -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Delete every mapping whose group id is not in `group_ids`; returns the
  /// number removed. An empty `group_ids` deletes nothing.
  fn delete_mappings_not_in_groups(
    &self,
    group_ids: Vec<String>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Cache a resolved team id on every mapping of `org_id` targeting
  /// `team_name`.
  fn update_mapping_team_id_for_name(
    &self,
    org_id: i64,
    team_name: String,
    team_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Plan ──────────────────────────────────────────────────────────────

  /// Discard the current plan and store `plan` as the new one, with status
  /// [`PlanStatus::Planned`]. Returns the plan with store-assigned ids.
  fn replace_plan(
    &self,
    plan: NewPlan,
  ) -> impl Future<Output = Result<Plan, Self::Error>> + Send + '_;

  fn clear_plan(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn latest_plan(&self)
  -> impl Future<Output = Result<Option<Plan>, Self::Error>> + Send + '_;

  fn update_plan_status(
    &self,
    plan_id: i64,
    status: PlanStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Audit ledger ──────────────────────────────────────────────────────

  fn record_sync_action(
    &self,
    entry: NewSyncAction,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Most recent ledger entries, newest first.
  fn recent_sync_actions(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SyncAction>, Self::Error>> + Send + '_;

  fn latest_sync_action_time(
    &self,
    org_id: i64,
  ) -> impl Future<Output = Result<Option<DateTime<Utc>>, Self::Error>> + Send + '_;

  /// Distinct emails touched by user-affecting actions in `org_id` since
  /// `since`.
  fn count_distinct_user_changes_since(
    &self,
    org_id: i64,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Distinct teams created in `org_id` since `since`.
  fn count_distinct_team_changes_since(
    &self,
    org_id: i64,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  // ── Settings ──────────────────────────────────────────────────────────

  fn get_setting(
    &self,
    key: String,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  fn set_setting(
    &self,
    key: String,
    value: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
