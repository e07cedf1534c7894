//! SQL schema for the teamsync SQLite store.
//!
//! Executed once at connection startup. Column names of `plan_actions` and
//! `sync_actions` are read by external reporting and must not change.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS settings (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orgs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    grafana_org_id  INTEGER NOT NULL UNIQUE,
    name            TEXT,
    default_role    TEXT              -- NULL: use the service default
);

-- org_id is not a foreign key: deleting an org leaves its
-- mappings dangling, and the engine skips them.
CREATE TABLE IF NOT EXISTS mappings (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id               INTEGER NOT NULL,
    grafana_team_name    TEXT NOT NULL,
    grafana_team_id      INTEGER NOT NULL DEFAULT 0,   -- 0: not yet resolved
    external_group_id    TEXT NOT NULL,
    external_group_name  TEXT,
    team_role            TEXT NOT NULL DEFAULT 'member',
    role_override        TEXT,
    updated_at           TEXT
);

-- At most one row: the current plan.
CREATE TABLE IF NOT EXISTS plans (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at  TEXT NOT NULL,
    status      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plan_actions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    plan_id            INTEGER NOT NULL REFERENCES plans(id),
    action_type        TEXT NOT NULL,
    org_id             INTEGER,
    grafana_org_id     INTEGER,
    team_id            INTEGER,
    team_name          TEXT,
    team_role          TEXT,
    user_id            INTEGER,
    email              TEXT,
    display_name       TEXT,
    role               TEXT,
    external_group_id  TEXT,
    note               TEXT
);

-- Append-only audit ledger.
CREATE TABLE IF NOT EXISTS sync_actions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at      TEXT NOT NULL,    -- RFC 3339 UTC, second precision
    org_id          INTEGER NOT NULL,
    grafana_org_id  INTEGER,
    action_type     TEXT NOT NULL,
    team_name       TEXT,
    email           TEXT
);

CREATE INDEX IF NOT EXISTS mappings_org_idx          ON mappings(org_id);
CREATE INDEX IF NOT EXISTS plan_actions_plan_idx     ON plan_actions(plan_id);
CREATE INDEX IF NOT EXISTS sync_actions_org_idx      ON sync_actions(org_id);
CREATE INDEX IF NOT EXISTS sync_actions_created_idx  ON sync_actions(created_at);

PRAGMA user_version = 1;
";
