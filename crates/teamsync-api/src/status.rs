//! Operational endpoints: status, settings, the audit ledger and live
//! directory lookups.
//!
//! | Method | Path                              | Notes |
//! |--------|-----------------------------------|-------|
//! | `GET`  | `/status`                         | Last run and per-org change counts |
//! | `PUT`  | `/settings/auto-sync`             | Body: `{"enabled":true}` |
//! | `GET`  | `/audit`                          | Optional `?limit=<n>` (default 100) |
//! | `GET`  | `/directory/groups/{id}/members`  | |
//! | `GET`  | `/directory/users`                | Every user in the tenant |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use teamsync_core::{
  audit::SyncAction,
  directory::{Directory, DirectoryMember},
  platform::Platform,
  store::MappingStore,
};
use teamsync_engine::{LastRun, Syncer};
use tracing::info;

use crate::error::ApiError;

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;

// ─── Status ───────────────────────────────────────────────────────────────────

/// Distinct users and teams changed within one window.
#[derive(Debug, Default, Serialize)]
pub struct WindowCounts {
  pub users: u64,
  pub teams: u64,
}

#[derive(Debug, Serialize)]
pub struct OrgStatus {
  pub org_id:              i64,
  pub platform_org_id:     i64,
  pub name:                String,
  pub last_sync_action:    Option<DateTime<Utc>>,
  pub changes_today:       WindowCounts,
  pub changes_last_3_days: WindowCounts,
  pub changes_last_7_days: WindowCounts,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  pub generated_at: DateTime<Utc>,
  pub running:      bool,
  pub auto_sync:    bool,
  pub last_run:     LastRun,
  pub orgs:         Vec<OrgStatus>,
}

async fn window<S: MappingStore>(
  store: &S,
  org_id: i64,
  since: DateTime<Utc>,
) -> Result<WindowCounts, ApiError> {
  Ok(WindowCounts {
    users: store
      .count_distinct_user_changes_since(org_id, since)
      .await
      .map_err(ApiError::store)?,
    teams: store
      .count_distinct_team_changes_since(org_id, since)
      .await
      .map_err(ApiError::store)?,
  })
}

/// `GET /status`
///
/// "Today" starts at midnight UTC; the other windows are rolling.
pub async fn status<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<StatusResponse>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let store = syncer.store();
  let now = Utc::now();
  let start_of_day = now
    .date_naive()
    .and_hms_opt(0, 0, 0)
    .map(|midnight| midnight.and_utc())
    .unwrap_or(now);

  let mut orgs = Vec::new();
  for org in store.list_orgs().await.map_err(ApiError::store)? {
    orgs.push(OrgStatus {
      last_sync_action:    store
        .latest_sync_action_time(org.id)
        .await
        .map_err(ApiError::store)?,
      changes_today:       window(store, org.id, start_of_day).await?,
      changes_last_3_days: window(store, org.id, now - Duration::days(3)).await?,
      changes_last_7_days: window(store, org.id, now - Duration::days(7)).await?,
      org_id:              org.id,
      platform_org_id:     org.platform_org_id,
      name:                org.name,
    });
  }

  Ok(Json(StatusResponse {
    generated_at: now,
    running: syncer.is_running(),
    auto_sync: syncer.auto_sync_enabled().await?,
    last_run: syncer.last_run(),
    orgs,
  }))
}

// ─── Settings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct AutoSyncBody {
  pub enabled: bool,
}

/// `PUT /settings/auto-sync`
pub async fn set_auto_sync<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Json(body): Json<AutoSyncBody>,
) -> Result<Json<AutoSyncBody>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  syncer.set_auto_sync(body.enabled).await?;
  info!(enabled = body.enabled, "auto-sync setting changed");
  Ok(Json(body))
}

// ─── Audit ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub limit: Option<usize>,
}

/// `GET /audit[?limit=<n>]`, newest first.
pub async fn audit<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Query(params): Query<AuditParams>,
) -> Result<Json<Vec<SyncAction>>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let limit = params
    .limit
    .unwrap_or(DEFAULT_AUDIT_LIMIT)
    .clamp(1, MAX_AUDIT_LIMIT);
  let actions = syncer
    .store()
    .recent_sync_actions(limit)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(actions))
}

// ─── Directory ────────────────────────────────────────────────────────────────

/// `GET /directory/groups/{id}/members`
pub async fn group_members<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Path(group_id): Path<String>,
) -> Result<Json<Vec<DirectoryMember>>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let members = syncer
    .directory()
    .list_group_members(&group_id)
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  Ok(Json(members))
}

/// `GET /directory/users`
pub async fn directory_users<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<Vec<DirectoryMember>>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let users = syncer
    .directory()
    .list_users()
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
  info!(count = users.len(), "listed directory users");
  Ok(Json(users))
}
