//! [`GrafanaClient`]: the `Platform` implementation over Grafana's HTTP API.

use std::{
  fmt,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, header::ACCEPT};
use serde::{Deserialize, de::DeserializeOwned};
use teamsync_core::{
  platform::{
    NewUser, OrgUser, Platform, PlatformError, PlatformResult, PlatformUser, Team, TeamMember,
  },
  role::{OrgRole, TeamRole},
};
use tracing::debug;

use crate::{
  Error, Result,
  wire::{
    AddOrgUserBody, AddTeamMemberBody, CreateTeamBody, CreateUserBody, CreatedTeam, CreatedUser,
    OrgUserDto, RoleBody, TeamMemberDto, TeamSearch, UserDto, classify, team_role_name,
  },
};

const ORG_HEADER: &str = "X-Grafana-Org-Id";
const TEAMS_PER_PAGE: u32 = 500;

/// Connection settings for the Grafana admin API.
///
/// A non-empty `admin_token` takes precedence over basic auth.
#[derive(Clone, Deserialize)]
pub struct GrafanaConfig {
  pub url:            String,
  #[serde(default)]
  pub admin_user:     String,
  #[serde(default)]
  pub admin_password: String,
  #[serde(default)]
  pub admin_token:    String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:   u64,
}

fn default_timeout_secs() -> u64 { 30 }

impl Default for GrafanaConfig {
  fn default() -> Self {
    Self {
      url:            String::new(),
      admin_user:     String::new(),
      admin_password: String::new(),
      admin_token:    String::new(),
      timeout_secs:   default_timeout_secs(),
    }
  }
}

impl fmt::Debug for GrafanaConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GrafanaConfig")
      .field("url", &self.url)
      .field("admin_user", &self.admin_user)
      .field("admin_password", &"<redacted>")
      .field("admin_token", &"<redacted>")
      .field("timeout_secs", &self.timeout_secs)
      .finish()
  }
}

#[derive(Clone)]
enum Auth {
  None,
  Basic { user: String, password: String },
  Bearer(String),
}

/// Async client for the Grafana HTTP API.
///
/// Cheap to clone; clones share the connection pool and the last-success
/// timestamp.
#[derive(Clone)]
pub struct GrafanaClient {
  client:   Client,
  base_url: String,
  auth:     Auth,
  last_ok:  Arc<Mutex<Option<DateTime<Utc>>>>,
}

fn transport(e: reqwest::Error) -> PlatformError { PlatformError::Transport(Box::new(e)) }

impl GrafanaClient {
  pub fn new(config: &GrafanaConfig) -> Result<Self> {
    let base_url = config.url.trim().trim_end_matches('/').to_owned();
    if base_url.is_empty() {
      return Err(Error::MissingUrl);
    }

    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs.max(1)))
      .build()?;

    let auth = if !config.admin_token.is_empty() {
      Auth::Bearer(config.admin_token.clone())
    } else if !config.admin_user.is_empty() || !config.admin_password.is_empty() {
      Auth::Basic {
        user:     config.admin_user.clone(),
        password: config.admin_password.clone(),
      }
    } else {
      Auth::None
    };

    Ok(Self { client, base_url, auth, last_ok: Arc::new(Mutex::new(None)) })
  }

  pub fn base_url(&self) -> &str { &self.base_url }

  /// When Grafana last answered a request successfully.
  pub fn last_ok(&self) -> Option<DateTime<Utc>> {
    *self.last_ok.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn url(&self, path: &str) -> String { format!("{}/api{}", self.base_url, path) }

  async fn send(&self, req: RequestBuilder) -> PlatformResult<Response> {
    let req = match &self.auth {
      Auth::None => req,
      Auth::Basic { user, password } => req.basic_auth(user, Some(password)),
      Auth::Bearer(token) => req.bearer_auth(token),
    };

    let resp = req
      .header(ACCEPT, "application/json")
      .send()
      .await
      .map_err(transport)?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      debug!(status = status.as_u16(), %body, "grafana request failed");
      return Err(classify(status.as_u16(), body));
    }

    *self.last_ok.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    Ok(resp)
  }

  async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> PlatformResult<T> {
    self.send(req).await?.json().await.map_err(transport)
  }

  async fn search_teams(&self, org: i64, query: &[(&str, String)]) -> PlatformResult<TeamSearch> {
    self
      .fetch(
        self
          .client
          .get(self.url("/teams/search"))
          .header(ORG_HEADER, org.to_string())
          .query(&[("orgId", org.to_string())])
          .query(query),
      )
      .await
  }
}

impl Platform for GrafanaClient {
  // ── Teams ─────────────────────────────────────────────────────────────────

  /// `GET /api/teams/search?name=<name>&orgId=<org>`
  async fn search_team(&self, org: i64, name: &str) -> PlatformResult<Option<i64>> {
    let name = name.trim();
    let found = self.search_teams(org, &[("name", name.to_owned())]).await?;
    Ok(
      found
        .teams
        .into_iter()
        .find(|t| t.name.trim().eq_ignore_ascii_case(name))
        .map(|t| t.id),
    )
  }

  /// Search first; `POST /api/teams` only when no team has that name.
  async fn ensure_team(&self, org: i64, name: &str) -> PlatformResult<i64> {
    if let Some(id) = self.search_team(org, name).await? {
      return Ok(id);
    }

    let created: CreatedTeam = self
      .fetch(
        self
          .client
          .post(self.url("/teams"))
          .header(ORG_HEADER, org.to_string())
          .json(&CreateTeamBody { name: name.trim(), org_id: org }),
      )
      .await?;

    if created.team_id == 0 {
      return Err(PlatformError::Status {
        status: 200,
        body:   format!("creating team {name:?} returned no id"),
      });
    }
    Ok(created.team_id)
  }

  /// Pages through `GET /api/teams/search` until an empty page.
  async fn list_teams(&self, org: i64) -> PlatformResult<Vec<Team>> {
    let mut teams = Vec::new();
    for page in 1.. {
      let found = self
        .search_teams(org, &[
          ("page", page.to_string()),
          ("perpage", TEAMS_PER_PAGE.to_string()),
        ])
        .await?;
      if found.teams.is_empty() {
        break;
      }
      teams.extend(found.teams.into_iter().map(Team::from));
    }
    Ok(teams)
  }

  /// `GET /api/teams/{id}/members`
  async fn list_team_members(&self, team_id: i64) -> PlatformResult<Vec<TeamMember>> {
    let members: Vec<TeamMemberDto> = self
      .fetch(self.client.get(self.url(&format!("/teams/{team_id}/members"))))
      .await?;
    Ok(members.into_iter().map(TeamMember::from).collect())
  }

  // ── Users ─────────────────────────────────────────────────────────────────

  /// `GET /api/users/lookup?loginOrEmail=<email>`; 404 means no such user.
  async fn lookup_user(&self, email: &str) -> PlatformResult<Option<PlatformUser>> {
    let req = self
      .client
      .get(self.url("/users/lookup"))
      .query(&[("loginOrEmail", email)]);
    match self.fetch::<UserDto>(req).await {
      Ok(user) => Ok(Some(user.into())),
      Err(PlatformError::NotFound(_)) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// `POST /api/admin/users`
  async fn create_user(&self, user: NewUser) -> PlatformResult<PlatformUser> {
    let created: CreatedUser = self
      .fetch(self.client.post(self.url("/admin/users")).json(&CreateUserBody {
        name:     &user.name,
        email:    &user.email,
        login:    &user.login,
        password: &user.password,
      }))
      .await?;

    Ok(PlatformUser { id: created.id, login: user.login, email: user.email, name: user.name })
  }

  // ── Org membership ────────────────────────────────────────────────────────

  /// `POST /api/orgs/{org}/users`
  async fn add_user_to_org(&self, org: i64, email: &str, role: OrgRole) -> PlatformResult<()> {
    self
      .send(
        self
          .client
          .post(self.url(&format!("/orgs/{org}/users")))
          .json(&AddOrgUserBody { login_or_email: email, role: role.as_ref() }),
      )
      .await
      .map(drop)
  }

  /// `PATCH /api/orgs/{org}/users/{user}`
  async fn update_user_role(&self, org: i64, user_id: i64, role: OrgRole) -> PlatformResult<()> {
    self
      .send(
        self
          .client
          .patch(self.url(&format!("/orgs/{org}/users/{user_id}")))
          .json(&RoleBody { role: role.as_ref() }),
      )
      .await
      .map(drop)
  }

  /// `GET /api/orgs/{org}/users`
  async fn list_org_users(&self, org: i64) -> PlatformResult<Vec<OrgUser>> {
    let users: Vec<OrgUserDto> = self
      .fetch(self.client.get(self.url(&format!("/orgs/{org}/users"))))
      .await?;
    Ok(users.into_iter().map(OrgUser::from).collect())
  }

  // ── Team membership ───────────────────────────────────────────────────────

  /// `POST /api/teams/{team}/members`; the role is only sent for admins.
  async fn add_user_to_team(&self, team_id: i64, user_id: i64, role: TeamRole) -> PlatformResult<()> {
    let role = (role == TeamRole::Admin).then(|| team_role_name(role));
    self
      .send(
        self
          .client
          .post(self.url(&format!("/teams/{team_id}/members")))
          .json(&AddTeamMemberBody { user_id, role }),
      )
      .await
      .map(drop)
  }

  /// `PUT /api/teams/{team}/members/{user}`
  async fn update_team_member_role(
    &self,
    team_id: i64,
    user_id: i64,
    role: TeamRole,
  ) -> PlatformResult<()> {
    self
      .send(
        self
          .client
          .put(self.url(&format!("/teams/{team_id}/members/{user_id}")))
          .json(&RoleBody { role: team_role_name(role) }),
      )
      .await
      .map(drop)
  }

  /// `DELETE /api/teams/{team}/members/{user}`
  async fn remove_user_from_team(&self, team_id: i64, user_id: i64) -> PlatformResult<()> {
    self
      .send(
        self
          .client
          .delete(self.url(&format!("/teams/{team_id}/members/{user_id}"))),
      )
      .await
      .map(drop)
  }
}
