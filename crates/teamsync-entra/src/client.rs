//! [`EntraClient`]: the `Directory` implementation over Microsoft Graph.

use std::{fmt, time::Duration};

use reqwest::{Client, StatusCode, Url, header::ACCEPT};
use serde::{Deserialize, de::DeserializeOwned};
use teamsync_core::directory::{Directory, DirectoryError, DirectoryGroup, DirectoryMember};
use tracing::{debug, warn};

use crate::{Error, Result, token::TokenCache};

const MEMBER_FIELDS: &str = "id,displayName,mail,userPrincipalName";
const GROUP_FIELDS: &str = "id,displayName,mail,securityEnabled,mailEnabled";

/// Tenant and app registration used for the client-credentials flow.
#[derive(Clone, Deserialize)]
pub struct EntraConfig {
  #[serde(default)]
  pub tenant_id:          String,
  #[serde(default)]
  pub client_id:          String,
  #[serde(default)]
  pub client_secret:      String,
  #[serde(default = "default_authority")]
  pub authority_base_url: String,
  #[serde(default = "default_graph")]
  pub graph_base_url:     String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:       u64,
}

fn default_authority() -> String { "https://login.microsoftonline.com".into() }
fn default_graph() -> String { "https://graph.microsoft.com/v1.0".into() }
fn default_timeout_secs() -> u64 { 30 }

impl Default for EntraConfig {
  fn default() -> Self {
    Self {
      tenant_id:          String::new(),
      client_id:          String::new(),
      client_secret:      String::new(),
      authority_base_url: default_authority(),
      graph_base_url:     default_graph(),
      timeout_secs:       default_timeout_secs(),
    }
  }
}

impl fmt::Debug for EntraConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EntraConfig")
      .field("tenant_id", &self.tenant_id)
      .field("client_id", &self.client_id)
      .field("client_secret", &"<redacted>")
      .field("authority_base_url", &self.authority_base_url)
      .field("graph_base_url", &self.graph_base_url)
      .field("timeout_secs", &self.timeout_secs)
      .finish()
  }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
  #[serde(default = "Vec::new")]
  value:     Vec<T>,
  #[serde(rename = "@odata.nextLink")]
  next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberDto {
  id:                  String,
  display_name:        Option<String>,
  mail:                Option<String>,
  user_principal_name: Option<String>,
}

impl From<MemberDto> for DirectoryMember {
  fn from(m: MemberDto) -> Self {
    Self {
      id:                  m.id,
      display_name:        m.display_name,
      mail:                m.mail,
      user_principal_name: m.user_principal_name,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupDto {
  id:               String,
  #[serde(default)]
  display_name:     Option<String>,
  #[serde(default)]
  mail:             Option<String>,
  #[serde(default)]
  security_enabled: Option<bool>,
  #[serde(default)]
  mail_enabled:     Option<bool>,
}

impl From<GroupDto> for DirectoryGroup {
  fn from(g: GroupDto) -> Self {
    Self {
      id:               g.id,
      display_name:     g.display_name.unwrap_or_default(),
      mail:             g.mail.filter(|m| !m.is_empty()),
      security_enabled: g.security_enabled.unwrap_or(false),
      mail_enabled:     g.mail_enabled.unwrap_or(false),
    }
  }
}

fn transport(e: reqwest::Error) -> DirectoryError { DirectoryError::Transport(Box::new(e)) }

/// Read-only Graph client. Share it behind an `Arc`; the token cache lives
/// inside.
pub struct EntraClient {
  http:       Client,
  graph_base: Url,
  token:      TokenCache,
}

impl EntraClient {
  pub fn new(config: &EntraConfig) -> Result<Self> {
    for (name, value) in [
      ("tenant_id", &config.tenant_id),
      ("client_id", &config.client_id),
      ("client_secret", &config.client_secret),
    ] {
      if value.trim().is_empty() {
        return Err(Error::Missing(name));
      }
    }

    let graph_base = Url::parse(config.graph_base_url.trim())
      .ok()
      .filter(|url| !url.cannot_be_a_base())
      .ok_or_else(|| Error::GraphUrl(config.graph_base_url.clone()))?;

    let http = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs.max(1)))
      .build()?;

    Ok(Self {
      http,
      graph_base,
      token: TokenCache::new(
        &config.authority_base_url,
        &config.tenant_id,
        &config.client_id,
        &config.client_secret,
      ),
    })
  }

  /// `{graph_base}/{segments...}?$select={fields}`. Each segment is
  /// percent-encoded, so ids cannot escape their place in the path.
  fn endpoint(&self, segments: &[&str], fields: &str) -> String {
    let mut url = self.graph_base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url.set_query(Some(&format!("$select={fields}")));
    url.into()
  }

  /// Fetch `url` and every page after it.
  async fn get_all<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, DirectoryError> {
    let mut items = Vec::new();
    let mut next = Some(url);
    while let Some(url) = next {
      let page: Page<T> = self.get_page(&url).await?;
      items.extend(page.value);
      next = page.next_link.filter(|l| !l.is_empty());
    }
    Ok(items)
  }

  /// One GET; a 401 drops the cached token and retries once.
  async fn get_page<T: DeserializeOwned>(&self, url: &str) -> Result<Page<T>, DirectoryError> {
    let mut retried = false;
    loop {
      let token = self.token.get(&self.http).await?;
      let resp = self
        .http
        .get(url)
        .bearer_auth(&token)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(transport)?;

      let status = resp.status();
      if status == StatusCode::UNAUTHORIZED && !retried {
        warn!("graph rejected access token; refreshing");
        self.token.invalidate().await;
        retried = true;
        continue;
      }
      if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(DirectoryError::Status {
          status: status.as_u16(),
          body:   body.trim().to_owned(),
        });
      }
      return resp.json().await.map_err(transport);
    }
  }
}

impl Directory for EntraClient {
  /// `GET /groups/{id}/members?$select=...`
  async fn list_group_members(&self, group_id: &str) -> Result<Vec<DirectoryMember>, DirectoryError> {
    let url = self.endpoint(&["groups", group_id.trim(), "members"], MEMBER_FIELDS);
    let members: Vec<MemberDto> = self.get_all(url).await?;
    debug!(group = group_id, count = members.len(), "listed group members");
    Ok(members.into_iter().map(DirectoryMember::from).collect())
  }

  /// `GET /groups?$select=...`
  async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
    let groups: Vec<GroupDto> = self.get_all(self.endpoint(&["groups"], GROUP_FIELDS)).await?;
    Ok(groups.into_iter().map(DirectoryGroup::from).collect())
  }

  /// `GET /users?$select=...`
  async fn list_users(&self) -> Result<Vec<DirectoryMember>, DirectoryError> {
    let users: Vec<MemberDto> = self.get_all(self.endpoint(&["users"], MEMBER_FIELDS)).await?;
    debug!(count = users.len(), "listed directory users");
    Ok(users.into_iter().map(DirectoryMember::from).collect())
  }
}
