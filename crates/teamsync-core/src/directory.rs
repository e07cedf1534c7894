//! The `Directory` trait: the authoritative source of group membership.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::normalize_email;

/// A directory user, either listed as a group member or by the full user
/// listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMember {
  pub id:                  String,
  pub display_name:        Option<String>,
  pub mail:                Option<String>,
  pub user_principal_name: Option<String>,
}

impl DirectoryMember {
  /// The normalised email used as identity key, or `None` when the member has
  /// no mail attribute.
  pub fn email(&self) -> Option<String> {
    self
      .mail
      .as_deref()
      .map(normalize_email)
      .filter(|e| !e.is_empty())
  }

  pub fn display_name(&self) -> Option<&str> {
    self
      .display_name
      .as_deref()
      .map(str::trim)
      .filter(|n| !n.is_empty())
  }
}

/// A group as listed for operator discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryGroup {
  pub id:               String,
  pub display_name:     String,
  pub mail:             Option<String>,
  pub security_enabled: bool,
  pub mail_enabled:     bool,
}

/// Selects the directory groups that belong to this deployment by display
/// name. Matching ignores case and surrounding whitespace; empty parts match
/// everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupFilter {
  pub prefix:   String,
  pub contains: String,
}

impl Default for GroupFilter {
  fn default() -> Self {
    Self {
      prefix:   "gapp_".into(),
      contains: "_grf_".into(),
    }
  }
}

impl GroupFilter {
  pub fn matches(&self, display_name: &str) -> bool {
    let name = display_name.trim().to_lowercase();
    name.starts_with(&self.prefix.trim().to_lowercase())
      && name.contains(&self.contains.trim().to_lowercase())
  }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
  #[error("directory authentication failed: {0}")]
  Auth(String),

  #[error("directory returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("directory request failed: {0}")]
  Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Read-only access to directory group membership.
///
/// Implementations page internally; every list is fully materialised before
/// it is returned.
pub trait Directory: Send + Sync {
  fn list_group_members<'a>(
    &'a self,
    group_id: &'a str,
  ) -> impl Future<Output = Result<Vec<DirectoryMember>, DirectoryError>> + Send + 'a;

  fn list_groups(
    &self,
  ) -> impl Future<Output = Result<Vec<DirectoryGroup>, DirectoryError>> + Send + '_;

  /// Every user in the tenant.
  fn list_users(
    &self,
  ) -> impl Future<Output = Result<Vec<DirectoryMember>, DirectoryError>> + Send + '_;
}
