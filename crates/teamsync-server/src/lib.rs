//! teamsync server: configuration, router assembly and background loops.
//!
//! The binary in `main.rs` wires concrete clients into [`AppState`]; every
//! piece here stays generic so tests can swap in stubs.

pub mod auth;
pub mod cache;
pub mod error;
pub mod scheduler;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Json, Router,
  extract::State,
  middleware,
  routing::{get, post},
};
use serde::Deserialize;
use teamsync_core::{
  directory::{Directory, GroupFilter},
  platform::Platform,
  role::OrgRole,
  store::MappingStore,
};
use teamsync_engine::{Policy, Syncer};
use teamsync_entra::EntraConfig;
use teamsync_grafana::GrafanaConfig;
use tower_http::trace::TraceLayer;

use auth::AuthConfig;
use cache::{ExternalCache, ExternalSnapshot};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `teamsync.toml` and
/// `TEAMSYNC_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  pub sync:       SyncConfig,
  pub grafana:    GrafanaConfig,
  pub entra:      EntraConfig,
  /// Basic auth for the admin surface. Unset means no auth.
  pub auth:       Option<AuthConfig>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "0.0.0.0".into(),
      port:       8080,
      store_path: PathBuf::from("teamsync.db"),
      sync:       SyncConfig::default(),
      grafana:    GrafanaConfig::default(),
      entra:      EntraConfig::default(),
      auth:       None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Seconds between scheduled cycles; `0` disables the scheduler.
  pub interval_secs:        u64,
  /// Auto-sync state until an operator toggles it.
  pub auto_sync:            bool,
  pub default_user_role:    OrgRole,
  pub allow_create_users:   bool,
  pub allow_remove_members: bool,
  pub cache_refresh_secs:   u64,
  /// Directory groups in scope for mapping purges and the external view.
  pub group_filter:         GroupFilter,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs:        900,
      auto_sync:            true,
      default_user_role:    OrgRole::Viewer,
      allow_create_users:   true,
      allow_remove_members: true,
      cache_refresh_secs:   30,
      group_filter:         GroupFilter::default(),
    }
  }
}

impl SyncConfig {
  pub fn policy(&self) -> Policy {
    Policy {
      default_role:         self.default_user_role,
      allow_create_users:   self.allow_create_users,
      allow_remove_members: self.allow_remove_members,
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through the server's own handlers and middleware.
pub struct AppState<S, P, D> {
  pub syncer: Arc<Syncer<S, P, D>>,
  pub cache:  Arc<ExternalCache>,
  pub auth:   Option<Arc<AuthConfig>>,
}

impl<S, P, D> Clone for AppState<S, P, D> {
  fn clone(&self) -> Self {
    Self {
      syncer: self.syncer.clone(),
      cache:  self.cache.clone(),
      auth:   self.auth.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full HTTP surface: `/api/*` and `/external*` behind auth,
/// `/healthz` open.
pub fn router<S, P, D>(state: AppState<S, P, D>) -> Router
where
  S: MappingStore + 'static,
  P: Platform + 'static,
  D: Directory + 'static,
{
  Router::new()
    .route("/external", get(external::<S, P, D>))
    .route("/external/refresh", post(refresh_external::<S, P, D>))
    .nest_service("/api", teamsync_api::api_router(state.syncer.clone()))
    .layer(middleware::from_fn_with_state(
      state.clone(),
      auth::require_auth::<S, P, D>,
    ))
    .route("/healthz", get(healthz))
    .with_state(state)
    .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str { "ok" }

/// `GET /external`: the advisory snapshot, loaded inline on first use.
async fn external<S, P, D>(State(state): State<AppState<S, P, D>>) -> Json<ExternalSnapshot>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  Json(state.cache.get_or_refresh(&state.syncer).await)
}

/// `POST /external/refresh`
async fn refresh_external<S, P, D>(
  State(state): State<AppState<S, P, D>>,
) -> Json<ExternalSnapshot>
where
  S: MappingStore,
  P: Platform,
  D: Directory,
{
  state.cache.refresh(&state.syncer).await;
  Json(state.cache.snapshot())
}

#[cfg(test)]
pub(crate) mod tests {
  use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use rand_core::OsRng;
  use serde_json::Value;
  use teamsync_core::{
    directory::{DirectoryError, DirectoryGroup, DirectoryMember},
    platform::{NewUser, OrgUser, PlatformResult, PlatformUser, Team, TeamMember},
    role::TeamRole,
  };
  use teamsync_store_sqlite::SqliteStore;
  use tower::ServiceExt;

  use super::*;

  /// `g-platform` holds Ann; `g-grafana` passes the default group filter and
  /// holds Ann and Bo. `fail` breaks every call.
  pub(crate) struct StubDirectory {
    pub fail: bool,
  }

  impl Directory for StubDirectory {
    async fn list_group_members(
      &self,
      group_id: &str,
    ) -> Result<Vec<DirectoryMember>, DirectoryError> {
      if self.fail {
        return Err(DirectoryError::Status { status: 503, body: "down".into() });
      }
      let member = |id: &str, name: &str| DirectoryMember {
        id:                  id.into(),
        display_name:        Some(name.into()),
        mail:                Some(format!("{}@example.com", name.to_lowercase())),
        user_principal_name: None,
      };
      Ok(match group_id {
        "g-platform" => vec![member("u1", "Ann")],
        "g-grafana" => vec![member("u2", "Bo"), member("u1", "Ann")],
        _ => Vec::new(),
      })
    }

    async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
      if self.fail {
        return Err(DirectoryError::Status { status: 503, body: "down".into() });
      }
      Ok(
        [("g-platform", "Platform Team"), ("g-grafana", "GAPP_Ops_GRF_Viewers")]
          .into_iter()
          .map(|(id, name)| DirectoryGroup {
            id:               id.into(),
            display_name:     name.into(),
            mail:             None,
            security_enabled: true,
            mail_enabled:     false,
          })
          .collect(),
      )
    }

    async fn list_users(&self) -> Result<Vec<DirectoryMember>, DirectoryError> {
      self.list_group_members("g-grafana").await
    }
  }

  /// A platform with one team, `platform` (id 100), whose only member is Ann
  /// (user 7, team admin, org viewer). Every write succeeds.
  pub(crate) struct StubPlatform;

  impl Platform for StubPlatform {
    async fn search_team(&self, _: i64, name: &str) -> PlatformResult<Option<i64>> {
      Ok(name.eq_ignore_ascii_case("platform").then_some(100))
    }

    async fn ensure_team(&self, _: i64, _: &str) -> PlatformResult<i64> { Ok(100) }

    async fn list_teams(&self, _: i64) -> PlatformResult<Vec<Team>> {
      Ok(vec![Team { id: 100, name: "platform".into() }])
    }

    async fn list_team_members(&self, team_id: i64) -> PlatformResult<Vec<TeamMember>> {
      Ok(match team_id {
        100 => vec![TeamMember {
          user_id: 7,
          login:   "ann".into(),
          email:   "ann@example.com".into(),
          name:    "Ann".into(),
          role:    TeamRole::Admin,
        }],
        _ => Vec::new(),
      })
    }

    async fn lookup_user(&self, email: &str) -> PlatformResult<Option<PlatformUser>> {
      Ok((email == "ann@example.com").then(|| PlatformUser {
        id:    7,
        login: "ann".into(),
        email: email.into(),
        name:  "Ann".into(),
      }))
    }

    async fn create_user(&self, user: NewUser) -> PlatformResult<PlatformUser> {
      Ok(PlatformUser { id: 8, login: user.login, email: user.email, name: user.name })
    }

    async fn add_user_to_org(&self, _: i64, _: &str, _: OrgRole) -> PlatformResult<()> { Ok(()) }

    async fn update_user_role(&self, _: i64, _: i64, _: OrgRole) -> PlatformResult<()> { Ok(()) }

    async fn add_user_to_team(&self, _: i64, _: i64, _: TeamRole) -> PlatformResult<()> { Ok(()) }

    async fn update_team_member_role(&self, _: i64, _: i64, _: TeamRole) -> PlatformResult<()> {
      Ok(())
    }

    async fn remove_user_from_team(&self, _: i64, _: i64) -> PlatformResult<()> { Ok(()) }

    async fn list_org_users(&self, _: i64) -> PlatformResult<Vec<OrgUser>> {
      Ok(vec![OrgUser {
        user_id: 7,
        login:   "ann".into(),
        email:   "ann@example.com".into(),
        name:    "Ann".into(),
        role:    "Viewer".into(),
      }])
    }
  }

  async fn app(auth: Option<AuthConfig>) -> Router {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let syncer = Syncer::new(store, StubPlatform, StubDirectory { fail: false }, Policy::default());
    router(AppState {
      syncer: Arc::new(syncer),
      cache:  Arc::new(ExternalCache::new()),
      auth:   auth.map(Arc::new),
    })
  }

  fn auth_config() -> AuthConfig {
    let salt = SaltString::generate(&mut OsRng);
    AuthConfig {
      username:      "ops".into(),
      password_hash: Argon2::default()
        .hash_password(b"secret", &salt)
        .unwrap()
        .to_string(),
    }
  }

  async fn get(app: &Router, uri: &str, authorization: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::get(uri);
    if let Some(value) = authorization {
      req = req.header(header::AUTHORIZATION, value);
    }
    let res = app
      .clone()
      .oneshot(req.body(Body::empty()).unwrap())
      .await
      .unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
  }

  #[tokio::test]
  async fn api_is_open_without_auth_config() {
    let app = app(None).await;
    let (status, body) = get(&app, "/api/orgs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
  }

  #[tokio::test]
  async fn api_requires_credentials_when_configured() {
    let app = app(Some(auth_config())).await;

    let (status, body) = get(&app, "/api/orgs", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let good = format!("Basic {}", B64.encode("ops:secret"));
    let (status, _) = get(&app, "/api/orgs", Some(&good)).await;
    assert_eq!(status, StatusCode::OK);

    let bad = format!("Basic {}", B64.encode("ops:nope"));
    let (status, _) = get(&app, "/external", Some(&bad)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn healthz_skips_auth() {
    let app = app(Some(auth_config())).await;
    let res = app
      .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn external_snapshot_is_served() {
    let app = app(None).await;
    let (status, body) = get(&app, "/external", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["refreshed_at"].is_string());
    assert_eq!(body["groups"].as_array().unwrap().len(), 1);
    assert_eq!(body["groups"][0]["display_name"], "GAPP_Ops_GRF_Viewers");
    assert_eq!(body["users"][0]["mail"], "ann@example.com");
    assert_eq!(body["users"][0]["groups"], serde_json::json!(["GAPP_Ops_GRF_Viewers"]));
  }

  #[test]
  fn sync_config_defaults() {
    let cfg = ServerConfig::default();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.sync.interval_secs, 900);
    let policy = cfg.sync.policy();
    assert_eq!(policy.default_role, OrgRole::Viewer);
    assert!(policy.allow_create_users && policy.allow_remove_members);
  }

  #[test]
  fn config_overlays_partial_sections() {
    let cfg: ServerConfig = config::Config::builder()
      .add_source(config::File::from_str(
        "port = 9000\n[sync]\nallow_create_users = false\ndefault_user_role = \"editor\"\n\
         [sync.group_filter]\nprefix = \"team_\"\n",
        config::FileFormat::Toml,
      ))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.host, "0.0.0.0");
    assert!(!cfg.sync.allow_create_users);
    assert_eq!(cfg.sync.default_user_role, OrgRole::Editor);
    assert_eq!(cfg.sync.group_filter.prefix, "team_");
    assert_eq!(cfg.sync.group_filter.contains, "_grf_");
    assert_eq!(cfg.sync.interval_secs, 900);
    assert_eq!(cfg.sync.group_filter, GroupFilter::default());
    assert!(cfg.auth.is_none());
  }
}
