//! Handlers for `/plan` endpoints.
//!
//! | Method   | Path                  | Notes |
//! |----------|-----------------------|-------|
//! | `GET`    | `/plan`               | 404 when no plan is stored |
//! | `POST`   | `/plan/preview`       | Build and store a fresh plan |
//! | `POST`   | `/plan/apply`         | Apply the stored plan |
//! | `POST`   | `/plan/apply-selected`| Body: `{"action_ids":[1,2]}` |
//! | `POST`   | `/plan/run`           | Build, store and apply |
//! | `DELETE` | `/plan`               | |
//!
//! Anything that touches the execution slot answers 409 while another cycle
//! is running.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use teamsync_core::{
  directory::Directory,
  plan::{Plan, PlanAction, PlanStatus},
  platform::Platform,
  store::MappingStore,
};
use teamsync_engine::{ApplyReport, Syncer};

use crate::error::ApiError;

/// A plan action with its display label.
#[derive(Debug, Serialize)]
pub struct ActionView {
  #[serde(flatten)]
  pub action:     PlanAction,
  pub label:      &'static str,
  pub selectable: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanView {
  pub id:         i64,
  pub created_at: DateTime<Utc>,
  pub status:     PlanStatus,
  pub actions:    Vec<ActionView>,
}

impl From<Plan> for PlanView {
  fn from(plan: Plan) -> Self {
    Self {
      id:         plan.id,
      created_at: plan.created_at,
      status:     plan.status,
      actions:    plan
        .actions
        .into_iter()
        .map(|action| {
          let kind = action.kind();
          ActionView { action, label: kind.label(), selectable: kind.is_selectable() }
        })
        .collect(),
    }
  }
}

/// `GET /plan`
pub async fn current<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<PlanView>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  syncer
    .store()
    .latest_plan()
    .await
    .map_err(ApiError::store)?
    .map(|plan| Json(plan.into()))
    .ok_or_else(|| ApiError::NotFound("no plan".into()))
}

/// `POST /plan/preview`
pub async fn preview<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<PlanView>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let plan = syncer.preview().await?;
  Ok(Json(plan.into()))
}

/// `POST /plan/apply`
pub async fn apply<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<ApplyReport>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  Ok(Json(syncer.apply_current().await?))
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
  #[serde(default)]
  pub action_ids: Vec<i64>,
}

/// `POST /plan/apply-selected`
pub async fn apply_selected<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Json(body): Json<SelectBody>,
) -> Result<Json<ApplyReport>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  if body.action_ids.is_empty() {
    return Err(ApiError::BadRequest("no actions selected".into()));
  }
  Ok(Json(syncer.apply_selected(&body.action_ids).await?))
}

/// `POST /plan/run`
pub async fn run<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<ApplyReport>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  Ok(Json(syncer.run().await?))
}

/// `DELETE /plan`
pub async fn clear<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<StatusCode, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  syncer.clear_plan().await?;
  Ok(StatusCode::NO_CONTENT)
}
