//! Handlers for `/mappings` endpoints.
//!
//! | Method   | Path              | Notes |
//! |----------|-------------------|-------|
//! | `GET`    | `/mappings`       | |
//! | `POST`   | `/mappings`       | `group_id` may be omitted when `group_name` names a directory group |
//! | `GET`    | `/mappings/{id}`  | 404 if not found |
//! | `PUT`    | `/mappings/{id}`  | Replaces every field |
//! | `DELETE` | `/mappings/{id}`  | |
//! | `POST`   | `/mappings/purge` | Keeps mappings whose group passes the group filter |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use teamsync_core::{
  directory::Directory,
  org::{Mapping, NewMapping},
  platform::Platform,
  role::{OrgRole, TeamRole},
  store::MappingStore,
};
use teamsync_engine::Syncer;
use tracing::info;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MappingBody {
  pub org_id:        i64,
  pub team_name:     String,
  #[serde(default)]
  pub team_id:       Option<i64>,
  #[serde(default)]
  pub group_id:      String,
  #[serde(default)]
  pub group_name:    Option<String>,
  #[serde(default)]
  pub team_role:     Option<String>,
  #[serde(default)]
  pub role_override: Option<String>,
}

/// Validate `body` and turn it into a store input, resolving the group id
/// from its display name when only the name was given.
async fn resolve<S, P, D>(
  syncer: &Syncer<S, P, D>,
  body: MappingBody,
) -> Result<NewMapping, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let team_name = body.team_name.trim().to_owned();
  if team_name.is_empty() {
    return Err(ApiError::BadRequest("team_name is required".into()));
  }

  let orgs = syncer.store().list_orgs().await.map_err(ApiError::store)?;
  if !orgs.iter().any(|o| o.id == body.org_id) {
    return Err(ApiError::BadRequest(format!("unknown org {}", body.org_id)));
  }

  let group_name = body
    .group_name
    .map(|n| n.trim().to_owned())
    .filter(|n| !n.is_empty());
  let mut group_id = body.group_id.trim().to_owned();
  if group_id.is_empty() {
    let Some(name) = &group_name else {
      return Err(ApiError::BadRequest("group_id or group_name is required".into()));
    };
    let groups = syncer
      .directory()
      .list_groups()
      .await
      .map_err(|e| ApiError::Internal(e.to_string()))?;
    group_id = groups
      .into_iter()
      .find(|g| g.display_name.trim().eq_ignore_ascii_case(name))
      .map(|g| g.id)
      .ok_or_else(|| ApiError::BadRequest(format!("no directory group named {name:?}")))?;
  }

  let role_override = match body.role_override.as_deref().map(str::trim) {
    None | Some("") => None,
    Some(raw) => Some(OrgRole::parse(raw).map_err(|e| ApiError::BadRequest(e.to_string()))?),
  };

  Ok(NewMapping {
    org_id: body.org_id,
    team_name,
    team_id: body.team_id,
    group_id,
    group_name,
    team_role: body
      .team_role
      .as_deref()
      .map(TeamRole::normalize)
      .unwrap_or_default(),
    role_override,
  })
}

/// `GET /mappings`
pub async fn list<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<Vec<Mapping>>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let mappings = syncer.store().list_mappings().await.map_err(ApiError::store)?;
  Ok(Json(mappings))
}

/// `POST /mappings`
pub async fn create<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Json(body): Json<MappingBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let new = resolve(&syncer, body).await?;
  let mapping = syncer
    .store()
    .create_mapping(new)
    .await
    .map_err(ApiError::store)?;
  info!(mapping = mapping.id, team = %mapping.team_name, group = %mapping.group_id, "mapping created");
  Ok((StatusCode::CREATED, Json(mapping)))
}

/// `GET /mappings/{id}`
pub async fn get_one<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Path(id): Path<i64>,
) -> Result<Json<Mapping>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  syncer
    .store()
    .get_mapping(id)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("mapping {id} not found")))
}

/// `PUT /mappings/{id}`
///
/// The cached team id survives when the mapping still targets the same team
/// and the body does not name one.
pub async fn update<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Path(id): Path<i64>,
  Json(body): Json<MappingBody>,
) -> Result<Json<Mapping>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let store = syncer.store();
  let existing = store
    .get_mapping(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("mapping {id} not found")))?;

  let mut new = resolve(&syncer, body).await?;
  if new.team_id.is_none()
    && existing.org_id == new.org_id
    && existing.team_name.eq_ignore_ascii_case(&new.team_name)
  {
    new.team_id = existing.team_id;
  }

  store
    .update_mapping(id, new)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("mapping {id} not found")))
}

/// `DELETE /mappings/{id}`
pub async fn remove<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
  Path(id): Path<i64>,
) -> Result<StatusCode, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  if syncer.store().delete_mapping(id).await.map_err(ApiError::store)? {
    Ok(StatusCode::NO_CONTENT)
  } else {
    Err(ApiError::NotFound(format!("mapping {id} not found")))
  }
}

/// `POST /mappings/purge`: delete every mapping whose directory group does
/// not pass the configured group filter. Aborts when no group passes, so a
/// directory outage or a bad filter cannot wipe every mapping.
pub async fn purge<S, P, D>(
  State(syncer): State<Arc<Syncer<S, P, D>>>,
) -> Result<Json<Value>, ApiError>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  let groups = syncer
    .directory()
    .list_groups()
    .await
    .map_err(|e| ApiError::Internal(format!("failed to load directory groups: {e}")))?;
  let total = groups.len();

  let filter = syncer.group_filter();
  let keep: Vec<String> = groups
    .into_iter()
    .filter(|g| filter.matches(&g.display_name))
    .map(|g| g.id)
    .collect();
  if keep.is_empty() {
    return Err(ApiError::BadRequest(
      "no matching directory groups found; purge aborted".into(),
    ));
  }

  let kept = keep.len();
  let deleted = syncer
    .store()
    .delete_mappings_not_in_groups(keep)
    .await
    .map_err(ApiError::store)?;
  info!(deleted, kept, total, "purged mappings outside the filtered groups");
  Ok(Json(json!({ "deleted": deleted })))
}
