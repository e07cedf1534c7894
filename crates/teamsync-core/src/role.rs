//! Org-level and team-level roles.
//!
//! Both enums declare their variants weakest first, so the derived `Ord` is
//! the precedence used when several mappings reach the same user: the
//! stronger role always wins.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{Error, Result};

// ─── Org role ────────────────────────────────────────────────────────────────

/// Organization-wide permission level on the platform.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(try_from = "String")]
#[strum(ascii_case_insensitive)]
pub enum OrgRole {
  Viewer,
  Editor,
  Admin,
}

impl OrgRole {
  /// Parse a role name, ignoring case and surrounding whitespace.
  pub fn parse(raw: &str) -> Result<Self> {
    raw
      .trim()
      .parse()
      .map_err(|_| Error::UnknownOrgRole(raw.to_owned()))
  }

  /// Whether a role string reported by the platform names this role.
  pub fn matches(self, reported: &str) -> bool {
    self.as_ref().eq_ignore_ascii_case(reported.trim())
  }
}

impl TryFrom<String> for OrgRole {
  type Error = Error;

  fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

// ─── Team role ───────────────────────────────────────────────────────────────

/// Standing of a user within a single team.
///
/// Anything other than `"admin"` normalises to [`TeamRole::Member`].
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
)]
#[serde(rename_all = "lowercase", from = "String")]
#[strum(serialize_all = "lowercase")]
pub enum TeamRole {
  #[default]
  Member,
  Admin,
}

impl TeamRole {
  pub fn normalize(raw: &str) -> Self {
    if raw.trim().eq_ignore_ascii_case("admin") {
      Self::Admin
    } else {
      Self::Member
    }
  }
}

impl From<String> for TeamRole {
  fn from(value: String) -> Self { Self::normalize(&value) }
}
