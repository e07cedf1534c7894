//! [`SqliteStore`], the SQLite implementation of [`MappingStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use teamsync_core::{
  audit::{NewSyncAction, SyncAction},
  org::{Mapping, NewMapping, NewOrg, Org},
  plan::{ActionKind, NewPlan, Plan, PlanStatus},
  store::MappingStore,
};

use crate::{
  Error, Result,
  encode::{
    MAPPING_COLUMNS, PlanActionRow, RawOrg, RawPlan, RawSyncAction, decode_dt, encode_dt,
    encode_id, encode_role, mapping_from_row, plan_action_from_row,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A teamsync store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Distinct values of `column` across ledger rows of `org_id` since
  /// `since` whose kind is one of `kinds`.
  async fn count_distinct_since(
    &self,
    column: &'static str,
    org_id: i64,
    since: DateTime<Utc>,
    kinds: Vec<&'static str>,
  ) -> Result<u64> {
    let since_str = encode_dt(since);

    let count: i64 = self
      .conn
      .call(move |conn| {
        let placeholders = (0..kinds.len())
          .map(|i| format!("?{}", i + 3))
          .collect::<Vec<_>>()
          .join(", ");
        let sql = format!(
          "SELECT COUNT(DISTINCT lower({column})) FROM sync_actions
           WHERE org_id = ?1 AND created_at >= ?2
             AND {column} IS NOT NULL AND {column} != ''
             AND action_type IN ({placeholders})"
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> =
          vec![Box::new(org_id), Box::new(since_str)];
        params.extend(kinds.into_iter().map(|k| Box::new(k) as Box<dyn rusqlite::ToSql>));

        let n = conn.query_row(
          &sql,
          rusqlite::params_from_iter(params.iter()),
          |r| r.get(0),
        )?;
        Ok(n)
      })
      .await?;

    Ok(count.max(0) as u64)
  }
}

// ─── MappingStore impl ───────────────────────────────────────────────────────

impl MappingStore for SqliteStore {
  type Error = Error;

  // ── Orgs ──────────────────────────────────────────────────────────────────

  async fn list_orgs(&self) -> Result<Vec<Org>> {
    let raws: Vec<RawOrg> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id, grafana_org_id, name, default_role FROM orgs ORDER BY id",
        )?;
        let rows = stmt
          .query_map([], |r| {
            Ok(RawOrg {
              id:              r.get(0)?,
              platform_org_id: r.get(1)?,
              name:            r.get(2)?,
              default_role:    r.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawOrg::into_org).collect()
  }

  async fn create_org(&self, org: NewOrg) -> Result<Org> {
    let name = org.name.trim().to_owned();
    let role_str = encode_role(org.default_role);
    let platform_org_id = org.platform_org_id;

    let id = self
      .conn
      .call({
        let name = name.clone();
        move |conn| {
          conn.execute(
            "INSERT INTO orgs (grafana_org_id, name, default_role) VALUES (?1, ?2, ?3)",
            rusqlite::params![platform_org_id, name, role_str],
          )?;
          Ok(conn.last_insert_rowid())
        }
      })
      .await?;

    Ok(Org {
      id,
      platform_org_id,
      name,
      default_role: org.default_role,
    })
  }

  async fn delete_org(&self, id: i64) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        let n = conn.execute("DELETE FROM orgs WHERE id = ?1", rusqlite::params![id])?;
        Ok(n)
      })
      .await?;
    Ok(n > 0)
  }

  // ── Mappings ──────────────────────────────────────────────────────────────

  async fn list_mappings(&self) -> Result<Vec<Mapping>> {
    let raws = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {MAPPING_COLUMNS} FROM mappings ORDER BY id"))?;
        let rows = stmt
          .query_map([], mapping_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_mapping()).collect()
  }

  async fn get_mapping(&self, id: i64) -> Result<Option<Mapping>> {
    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!("SELECT {MAPPING_COLUMNS} FROM mappings WHERE id = ?1"),
            rusqlite::params![id],
            mapping_from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;

    raw.map(|r| r.into_mapping()).transpose()
  }

  async fn create_mapping(&self, mapping: NewMapping) -> Result<Mapping> {
    let now_str = encode_dt(Utc::now());
    let team_name = mapping.team_name.trim().to_owned();
    let group_id = mapping.group_id.trim().to_owned();
    let group_name = mapping.group_name.clone();
    let team_id = encode_id(mapping.team_id);
    let team_role = mapping.team_role.as_ref().to_owned();
    let override_str = encode_role(mapping.role_override);
    let org_id = mapping.org_id;

    let id = self
      .conn
      .call({
        let (team_name, group_id) = (team_name.clone(), group_id.clone());
        move |conn| {
          conn.execute(
            "INSERT INTO mappings (
               org_id, grafana_team_name, grafana_team_id, external_group_id,
               external_group_name, team_role, role_override, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              org_id,
              team_name,
              team_id,
              group_id,
              group_name,
              team_role,
              override_str,
              now_str,
            ],
          )?;
          Ok(conn.last_insert_rowid())
        }
      })
      .await?;

    Ok(Mapping {
      id,
      org_id,
      team_name,
      team_id: mapping.team_id.filter(|id| *id != 0),
      group_id,
      group_name: mapping.group_name.filter(|n| !n.trim().is_empty()),
      team_role: mapping.team_role,
      role_override: mapping.role_override,
    })
  }

  async fn update_mapping(&self, id: i64, mapping: NewMapping) -> Result<Option<Mapping>> {
    let now_str = encode_dt(Utc::now());
    let team_name = mapping.team_name.trim().to_owned();
    let group_id = mapping.group_id.trim().to_owned();
    let group_name = mapping.group_name;
    let team_id = encode_id(mapping.team_id);
    let team_role = mapping.team_role.as_ref().to_owned();
    let override_str = encode_role(mapping.role_override);
    let org_id = mapping.org_id;

    let n = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "UPDATE mappings SET
             org_id = ?1, grafana_team_name = ?2, grafana_team_id = ?3,
             external_group_id = ?4, external_group_name = ?5, team_role = ?6,
             role_override = ?7, updated_at = ?8
           WHERE id = ?9",
          rusqlite::params![
            org_id,
            team_name,
            team_id,
            group_id,
            group_name,
            team_role,
            override_str,
            now_str,
            id,
          ],
        )?;
        Ok(n)
      })
      .await?;

    if n == 0 {
      return Ok(None);
    }
    self.get_mapping(id).await
  }

  async fn delete_mapping(&self, id: i64) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        let n = conn.execute("DELETE FROM mappings WHERE id = ?1", rusqlite::params![id])?;
        Ok(n)
      })
      .await?;
    Ok(n > 0)
  }

  async fn delete_mappings_not_in_groups(&self, group_ids: Vec<String>) -> Result<u64> {
    if group_ids.is_empty() {
      return Ok(0);
    }

    let n = self
      .conn
      .call(move |conn| {
        let placeholders = (1..=group_ids.len())
          .map(|i| format!("?{i}"))
          .collect::<Vec<_>>()
          .join(", ");
        let n = conn.execute(
          &format!("DELETE FROM mappings WHERE external_group_id NOT IN ({placeholders})"),
          rusqlite::params_from_iter(group_ids.iter()),
        )?;
        Ok(n)
      })
      .await?;

    Ok(n as u64)
  }

  async fn update_mapping_team_id_for_name(
    &self,
    org_id: i64,
    team_name: String,
    team_id: i64,
  ) -> Result<()> {
    let now_str = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE mappings SET grafana_team_id = ?1, updated_at = ?2
           WHERE org_id = ?3 AND lower(trim(grafana_team_name)) = lower(trim(?4))",
          rusqlite::params![team_id, now_str, org_id, team_name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Plan ──────────────────────────────────────────────────────────────────

  async fn replace_plan(&self, plan: NewPlan) -> Result<Plan> {
    let created_at = encode_dt(plan.created_at);
    let created_str = created_at.clone();
    let status_str = PlanStatus::Planned.as_ref().to_owned();
    let rows: Vec<PlanActionRow> = plan.actions.iter().map(PlanActionRow::from_action).collect();

    let (plan_id, ids): (i64, Vec<i64>) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM plan_actions", [])?;
        tx.execute("DELETE FROM plans", [])?;
        tx.execute(
          "INSERT INTO plans (created_at, status) VALUES (?1, ?2)",
          rusqlite::params![created_str, status_str],
        )?;
        let plan_id = tx.last_insert_rowid();

        let mut ids = Vec::with_capacity(rows.len());
        {
          let mut stmt = tx.prepare(
            "INSERT INTO plan_actions (
               plan_id, action_type, org_id, grafana_org_id, team_id, team_name,
               team_role, user_id, email, display_name, role, external_group_id, note
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
          )?;
          for row in &rows {
            stmt.execute(rusqlite::params![
              plan_id,
              row.action_type,
              row.org_id,
              row.platform_org_id,
              row.team_id,
              row.team_name,
              row.team_role,
              row.user_id,
              row.email,
              row.display_name,
              row.role,
              row.group_id,
              row.note,
            ])?;
            ids.push(tx.last_insert_rowid());
          }
        }
        tx.commit()?;
        Ok((plan_id, ids))
      })
      .await?;

    let actions = plan
      .actions
      .into_iter()
      .zip(ids)
      .map(|(mut action, id)| {
        action.id = id;
        action
      })
      .collect();

    // Round-trip the timestamp so the result equals what `latest_plan` reads.
    Ok(Plan {
      id: plan_id,
      created_at: decode_dt(&created_at)?,
      status: PlanStatus::Planned,
      actions,
    })
  }

  async fn clear_plan(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM plan_actions", [])?;
        tx.execute("DELETE FROM plans", [])?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn latest_plan(&self) -> Result<Option<Plan>> {
    let raw: Option<RawPlan> = self
      .conn
      .call(|conn| {
        let head: Option<(i64, String, String)> = conn
          .query_row(
            "SELECT id, created_at, status FROM plans ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
          )
          .optional()?;

        let Some((id, created_at, status)) = head else {
          return Ok(None);
        };

        let mut stmt = conn.prepare(
          "SELECT id, action_type, org_id, grafana_org_id, team_id, team_name,
                  team_role, user_id, email, display_name, role, external_group_id, note
           FROM plan_actions WHERE plan_id = ?1 ORDER BY id",
        )?;
        let actions = stmt
          .query_map(rusqlite::params![id], plan_action_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(RawPlan { id, created_at, status, actions }))
      })
      .await?;

    raw.map(RawPlan::into_plan).transpose()
  }

  async fn update_plan_status(&self, plan_id: i64, status: PlanStatus) -> Result<()> {
    let status_str = status.as_ref().to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE plans SET status = ?1 WHERE id = ?2",
          rusqlite::params![status_str, plan_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Audit ledger ──────────────────────────────────────────────────────────

  async fn record_sync_action(&self, entry: NewSyncAction) -> Result<()> {
    let at_str = encode_dt(entry.created_at);
    let kind_str = entry.kind.as_ref().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_actions (
             created_at, org_id, grafana_org_id, action_type, team_name, email
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            at_str,
            entry.org_id,
            entry.platform_org_id,
            kind_str,
            entry.team_name,
            entry.email,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn recent_sync_actions(&self, limit: usize) -> Result<Vec<SyncAction>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, created_at, org_id, grafana_org_id, action_type, team_name, email
           FROM sync_actions ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit], |r| {
            Ok(RawSyncAction {
              id:              r.get(0)?,
              created_at:      r.get(1)?,
              org_id:          r.get(2)?,
              platform_org_id: r.get(3)?,
              action_type:     r.get(4)?,
              team_name:       r.get(5)?,
              email:           r.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSyncAction::into_sync_action).collect()
  }

  async fn latest_sync_action_time(&self, org_id: i64) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        let at = conn.query_row(
          "SELECT MAX(created_at) FROM sync_actions WHERE org_id = ?1",
          rusqlite::params![org_id],
          |r| r.get(0),
        )?;
        Ok(at)
      })
      .await?;

    raw.as_deref().map(decode_dt).transpose()
  }

  async fn count_distinct_user_changes_since(
    &self,
    org_id: i64,
    since: DateTime<Utc>,
  ) -> Result<u64> {
    let kinds = vec![
      ActionKind::CreateUser.into(),
      ActionKind::AddUserToOrg.into(),
      ActionKind::UpdateUserRole.into(),
      ActionKind::AddUserToTeam.into(),
      ActionKind::UpdateTeamRole.into(),
      ActionKind::RemoveUserFromTeam.into(),
    ];

    self.count_distinct_since("email", org_id, since, kinds).await
  }

  async fn count_distinct_team_changes_since(
    &self,
    org_id: i64,
    since: DateTime<Utc>,
  ) -> Result<u64> {
    self
      .count_distinct_since("team_name", org_id, since, vec![ActionKind::CreateTeam.into()])
      .await
  }

  // ── Settings ──────────────────────────────────────────────────────────────

  async fn get_setting(&self, key: String) -> Result<Option<String>> {
    let value = self
      .conn
      .call(move |conn| {
        let v = conn
          .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            rusqlite::params![key],
            |r| r.get(0),
          )
          .optional()?;
        Ok(v)
      })
      .await?;
    Ok(value)
  }

  async fn set_setting(&self, key: String, value: String) -> Result<()> {
    let now_str = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                          updated_at = excluded.updated_at",
          rusqlite::params![key, value, now_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
