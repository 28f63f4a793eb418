//! SQLite-based storage for accounts, report exports, fee totals and
//! reward overrides.
//!
//! This is the engine's source-of-truth data: the trigger evaluator reads it
//! and compares against the snapshot store. Deletions write a tombstone row
//! so a removed user is still detectable afterwards; row absence alone cannot
//! distinguish "deleted" from "never existed".

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{db_path, migrations};
use crate::error::DatabaseError;
use crate::period::PeriodKey;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Deputy,
    Admin,
}

/// Parse role from database string
fn parse_role(role_str: &str) -> Role {
    match role_str {
        "Admin" => Role::Admin,
        "Deputy" => Role::Deputy,
        _ => Role::User,
    }
}

/// Format role for database storage
fn format_role(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Deputy => "Deputy",
        Role::Admin => "Admin",
    }
}

/// Report cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    Daily,
    Monthly,
}

fn parse_report_kind(kind_str: &str) -> ReportKind {
    match kind_str {
        "MONTHLY" => ReportKind::Monthly,
        _ => ReportKind::Daily,
    }
}

fn format_report_kind(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Daily => "DAILY",
        ReportKind::Monthly => "MONTHLY",
    }
}

/// Parse datetime from RFC3339 string with fallback to current time
fn parse_datetime_fallback(dt_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub fullname: String,
    pub nickname: String,
    pub role: Role,
    pub approved: bool,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Record of a deleted account, kept so the deletion itself stays observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: i64,
    pub user_id: i64,
    pub fullname: String,
    pub nickname: String,
    pub deleted_at: DateTime<Utc>,
}

/// A recorded daily or monthly report export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportExport {
    pub id: i64,
    pub kind: ReportKind,
    pub period: PeriodKey,
    pub entry_count: i64,
    pub total_cents: i64,
    pub exported_by: Option<i64>,
    pub exported_at: DateTime<Utc>,
}

fn row_to_user(row: &rusqlite::Row) -> Result<UserRecord, rusqlite::Error> {
    let role_str: String = row.get(3)?;
    let approved: i64 = row.get(4)?;
    let approved_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(UserRecord {
        id: row.get(0)?,
        fullname: row.get(1)?,
        nickname: row.get(2)?,
        role: parse_role(&role_str),
        approved: approved != 0,
        approved_by: row.get(5)?,
        approved_at: approved_at.map(|s| parse_datetime_fallback(&s)),
        created_at: parse_datetime_fallback(&created_at),
    })
}

fn row_to_tombstone(row: &rusqlite::Row) -> Result<Tombstone, rusqlite::Error> {
    let deleted_at: String = row.get(4)?;
    Ok(Tombstone {
        id: row.get(0)?,
        user_id: row.get(1)?,
        fullname: row.get(2)?,
        nickname: row.get(3)?,
        deleted_at: parse_datetime_fallback(&deleted_at),
    })
}

fn row_to_export(row: &rusqlite::Row) -> Result<ReportExport, rusqlite::Error> {
    let kind_str: String = row.get(1)?;
    let period_str: String = row.get(2)?;
    let period = PeriodKey::parse(&period_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid period key '{period_str}'").into(),
        )
    })?;
    let exported_at: String = row.get(6)?;
    Ok(ReportExport {
        id: row.get(0)?,
        kind: parse_report_kind(&kind_str),
        period,
        entry_count: row.get(3)?,
        total_cents: row.get(4)?,
        exported_by: row.get(5)?,
        exported_at: parse_datetime_fallback(&exported_at),
    })
}

const USER_COLUMNS: &str =
    "id, fullname, nickname, role, approved, approved_by, approved_at_utc, created_at_utc";

/// SQLite database for accounts, report exports, fees and overrides.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at the configured path.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        Self::open_at(&db_path()?)
    }

    /// Open the database at an explicit path (tests, embedding).
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                fullname        TEXT NOT NULL,
                nickname        TEXT UNIQUE NOT NULL,
                role            TEXT NOT NULL CHECK(role IN ('User', 'Deputy', 'Admin')),
                approved        INTEGER NOT NULL DEFAULT 0,
                created_at_utc  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_tombstones (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                fullname       TEXT NOT NULL,
                nickname       TEXT NOT NULL,
                deleted_at_utc TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS report_exports (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                kind            TEXT NOT NULL CHECK(kind IN ('DAILY', 'MONTHLY')),
                period_key      TEXT NOT NULL,
                entry_count     INTEGER NOT NULL DEFAULT 0,
                total_cents     INTEGER NOT NULL DEFAULT 0,
                exported_by     INTEGER,
                exported_at_utc TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exports_period ON report_exports(kind, period_key);

            CREATE TABLE IF NOT EXISTS fee_totals (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                period_key     TEXT NOT NULL,
                amount_cents   INTEGER NOT NULL DEFAULT 0,
                updated_at_utc TEXT NOT NULL,
                UNIQUE(user_id, period_key)
            );

            CREATE TABLE IF NOT EXISTS reward_overrides (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                period_key     TEXT NOT NULL,
                amount_cents   INTEGER NOT NULL,
                created_at_utc TEXT NOT NULL,
                UNIQUE(user_id, period_key)
            );

            CREATE TABLE IF NOT EXISTS app_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        migrations::migrate(&self.conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    // === Users ===

    /// Register a new account, pending approval.
    ///
    /// # Errors
    /// Returns an error if the nickname is already taken or the insert fails.
    pub fn register_user(
        &self,
        fullname: &str,
        nickname: &str,
        at: DateTime<Utc>,
    ) -> Result<UserRecord, DatabaseError> {
        self.conn.execute(
            "INSERT INTO users (fullname, nickname, role, approved, created_at_utc)
             VALUES (?1, ?2, 'User', 0, ?3)",
            params![fullname, nickname, at.to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.user(id)?
            .ok_or_else(|| DatabaseError::QueryFailed("user vanished after insert".into()))
    }

    /// Create the default Admin account on first run, if no admin exists.
    pub fn ensure_default_admin(&self, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE role = 'Admin' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO users (fullname, nickname, role, approved, created_at_utc)
             VALUES ('Admin', 'Admin', 'Admin', 1, ?1)",
            params![at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn user(&self, id: i64) -> Result<Option<UserRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_user).optional()?)
    }

    /// All accounts, pending approval first (matches the admin list view).
    pub fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY approved ASC, id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Accounts still waiting for approval.
    pub fn users_pending_approval(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE approved = 0 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Approve a pending account. Returns false if the user does not exist or
    /// is already approved.
    pub fn approve_user(
        &self,
        user_id: i64,
        approver_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE users SET approved = 1, approved_by = ?2, approved_at_utc = ?3
             WHERE id = ?1 AND approved = 0",
            params![user_id, approver_id, at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn count_admins(&self) -> Result<i64, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'Admin'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete an account, writing a tombstone in the same transaction.
    ///
    /// Returns false if the user does not exist. Role policy (e.g. keeping at
    /// least one admin) is the caller's responsibility.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub fn delete_user(&self, user_id: i64, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let Some(user) = self.user(user_id)? else {
            return Ok(false);
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO user_tombstones (user_id, fullname, nickname, deleted_at_utc)
             VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.fullname, user.nickname, at.to_rfc3339()],
        )?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(true)
    }

    /// All deletion tombstones, oldest first.
    pub fn list_tombstones(&self) -> Result<Vec<Tombstone>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, fullname, nickname, deleted_at_utc
             FROM user_tombstones ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_tombstone)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // === Report exports ===

    /// Record that a daily or monthly report was exported.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_report_export(
        &self,
        kind: ReportKind,
        period: &PeriodKey,
        entry_count: i64,
        total_cents: i64,
        exported_by: Option<i64>,
        at: DateTime<Utc>,
    ) -> Result<ReportExport, DatabaseError> {
        self.conn.execute(
            "INSERT INTO report_exports
                (kind, period_key, entry_count, total_cents, exported_by, exported_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_report_kind(kind),
                period.to_string(),
                entry_count,
                total_cents,
                exported_by,
                at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, period_key, entry_count, total_cents, exported_by, exported_at_utc
             FROM report_exports WHERE id = ?1",
        )?;
        stmt.query_row(params![id], row_to_export).map_err(Into::into)
    }

    /// All recorded exports, oldest first.
    pub fn report_exports(&self) -> Result<Vec<ReportExport>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, period_key, entry_count, total_cents, exported_by, exported_at_utc
             FROM report_exports ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_export)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // === Fee totals ===

    /// Upsert the monthly airport-fee total for a user.
    pub fn set_fee_total(
        &self,
        user_id: i64,
        period: &PeriodKey,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO fee_totals (user_id, period_key, amount_cents, updated_at_utc)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, period_key)
             DO UPDATE SET amount_cents = excluded.amount_cents,
                           updated_at_utc = excluded.updated_at_utc",
            params![user_id, period.to_string(), amount_cents, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn fee_total(
        &self,
        user_id: i64,
        period: &PeriodKey,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT amount_cents FROM fee_totals WHERE user_id = ?1 AND period_key = ?2",
        )?;
        Ok(stmt
            .query_row(params![user_id, period.to_string()], |row| row.get(0))
            .optional()?)
    }

    /// Fee totals of every user for a period, user order.
    pub fn fee_totals_for(&self, period: &PeriodKey) -> Result<Vec<(i64, i64)>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, amount_cents FROM fee_totals
             WHERE period_key = ?1 ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![period.to_string()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // === Reward overrides ===

    /// Set a manual override amount for (user, period).
    pub fn set_override(
        &self,
        user_id: i64,
        period: &PeriodKey,
        amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO reward_overrides (user_id, period_key, amount_cents, created_at_utc)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, period_key)
             DO UPDATE SET amount_cents = excluded.amount_cents,
                           created_at_utc = excluded.created_at_utc",
            params![user_id, period.to_string(), amount_cents, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn override_for(
        &self,
        user_id: i64,
        period: &PeriodKey,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT amount_cents FROM reward_overrides WHERE user_id = ?1 AND period_key = ?2",
        )?;
        Ok(stmt
            .query_row(params![user_id, period.to_string()], |row| row.get(0))
            .optional()?)
    }

    /// Remove an override. Returns whether one existed.
    pub fn clear_override(&self, user_id: i64, period: &PeriodKey) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "DELETE FROM reward_overrides WHERE user_id = ?1 AND period_key = ?2",
            params![user_id, period.to_string()],
        )?;
        Ok(changed > 0)
    }

    // === App state ===

    /// Get a value from the app_state store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM app_state WHERE key = ?1")?;
        Ok(stmt
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// Set a value in the app_state store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO app_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn month(y: i32, m: u32) -> PeriodKey {
        PeriodKey::Month { year: y, month: m }
    }

    #[test]
    fn register_approve_and_list() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        db.ensure_default_admin(now).unwrap();

        let user = db.register_user("Jana Nováková", "jana", now).unwrap();
        assert!(!user.approved);
        assert_eq!(user.role, Role::User);
        assert_eq!(db.users_pending_approval().unwrap().len(), 1);

        assert!(db.approve_user(user.id, 1, now).unwrap());
        assert!(!db.approve_user(user.id, 1, now).unwrap());
        assert!(db.users_pending_approval().unwrap().is_empty());

        let listed = db.list_users().unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn duplicate_nickname_rejected() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        db.register_user("A", "same", now).unwrap();
        assert!(db.register_user("B", "same", now).is_err());
    }

    #[test]
    fn delete_writes_tombstone() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let user = db.register_user("Peter Kováč", "peter", now).unwrap();

        assert!(db.delete_user(user.id, now).unwrap());
        assert!(db.user(user.id).unwrap().is_none());
        assert!(!db.delete_user(user.id, now).unwrap());

        let tombstones = db.list_tombstones().unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].user_id, user.id);
        assert_eq!(tombstones[0].nickname, "peter");
    }

    #[test]
    fn report_exports_roundtrip() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let day = PeriodKey::Day(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        let export = db
            .record_report_export(ReportKind::Daily, &day, 12, 345_600, Some(1), now)
            .unwrap();
        assert_eq!(export.kind, ReportKind::Daily);
        assert_eq!(export.period, day);
        assert_eq!(export.total_cents, 345_600);

        let all = db.report_exports().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn fee_totals_upsert() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let period = month(2024, 6);

        db.set_fee_total(1, &period, 240_000, now).unwrap();
        db.set_fee_total(1, &period, 250_000, now).unwrap();
        assert_eq!(db.fee_total(1, &period).unwrap(), Some(250_000));
        assert_eq!(db.fee_total(2, &period).unwrap(), None);

        db.set_fee_total(2, &period, 190_000, now).unwrap();
        let all = db.fee_totals_for(&period).unwrap();
        assert_eq!(all, vec![(1, 250_000), (2, 190_000)]);
    }

    #[test]
    fn overrides_set_and_clear() {
        let db = Database::open_memory().unwrap();
        let now = Utc::now();
        let period = month(2024, 6);

        assert_eq!(db.override_for(5, &period).unwrap(), None);
        db.set_override(5, &period, 15_000, now).unwrap();
        assert_eq!(db.override_for(5, &period).unwrap(), Some(15_000));
        assert!(db.clear_override(5, &period).unwrap());
        assert!(!db.clear_override(5, &period).unwrap());
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        db.kv_set("test", "world").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "world");
    }
}
