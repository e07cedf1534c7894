//! Handlers for `/orgs` endpoints.
//!
//! | Method   | Path         | Notes |
//! |----------|--------------|-------|
//! | `GET`    | `/orgs`      | |
//! | `POST`   | `/orgs`      | Body: `{"platform_org_id":1,"name":"Main","default_role":"Viewer"}` |
//! | `DELETE` | `/orgs/{id}` | Mappings of the org are left in place |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use teamsync_core::{
  directory::Directory,
  org::{NewOrg, Org},
  platform::Platform,
  role::OrgRole,
  store::MappingStore,
};
use teamsync_engine::Syncer;
use tracing::info;

use crate::error::ApiError;

/// `GET /orgs`
pub async fn list<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<Vec<Org>>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let orgs = syncer.store().list_orgs().await.map_err(ApiError::store)?;
  Ok(Json(orgs))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub platform_org_id: i64,
  #[serde(default)]
  pub name:            String,
  #[serde(default)]
  pub default_role:    Option<String>,
}

/// `POST /orgs`; `default_role` falls back to `Viewer`.
pub async fn create<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  if body.platform_org_id <= 0 {
    return Err(ApiError::BadRequest("platform_org_id must be positive".into()));
  }
  let default_role = match body.default_role.as_deref().map(str::trim) {
    None | Some("") => OrgRole::Viewer,
    Some(raw) => OrgRole::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?,
  };

  let store = syncer.store();
  let existing = store.list_orgs().await.map_err(ApiError::store)?;
  if existing.iter().any(|o| o.platform_org_id == body.platform_org_id) {
    return Err(ApiError::Conflict(format!(
      "platform org {} is already managed",
      body.platform_org_id
    )));
  }

  let org = store
    .create_org(NewOrg {
      platform_org_id: body.platform_org_id,
      name:            body.name,
      default_role:    Some(default_role),
    })
    .await
    .map_err(ApiError::store)?;
  info!(org = org.id, platform_org = org.platform_org_id, "org created");
  Ok((StatusCode::CREATED, Json(org)))
}

/// `DELETE /orgs/{id}`
pub async fn remove<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Path(id): Path<i64>,
) -> Result<StatusCode, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  if syncer.store().delete_org(id).await.map_err(ApiError::store)? {
    info!(org = id, "org deleted");
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("org {id} not found")))
  }
}
