//! The append-only ledger of executed actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  identity::normalize_email,
  plan::{ActionKind, PlanAction},
};

/// One executed action as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAction {
  pub id:              i64,
  pub created_at:      DateTime<Utc>,
  pub org_id:          i64,
  pub platform_org_id: i64,
  pub kind:            ActionKind,
  pub team_name:       String,
  pub email:           String,
}

/// A ledger entry before the store assigns it an id.
#[derive(Debug, Clone)]
pub struct NewSyncAction {
  pub created_at:      DateTime<Utc>,
  pub org_id:          i64,
  pub platform_org_id: i64,
  pub kind:            ActionKind,
  pub team_name:       String,
  pub email:           String,
}

impl NewSyncAction {
  pub fn from_action(action: &PlanAction, at: DateTime<Utc>) -> Self {
    Self {
      created_at:      at,
      org_id:          action.org_id,
      platform_org_id: action.platform_org_id,
      kind:            action.kind(),
      team_name:       action.change.team_name().unwrap_or_default().to_owned(),
      email:           action
        .change
        .email()
        .map(normalize_email)
        .unwrap_or_default(),
    }
  }
}
