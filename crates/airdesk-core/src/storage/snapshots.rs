//! Durable snapshot store: the dedup key, delivery marker and audit log in one.
//!
//! One row per (condition-kind, period-key, subject-id). A row is created the
//! first time a condition becomes true and is never deleted; the dispatcher
//! mutates it exactly once to set the delivered marker. The popup queue lives
//! next to it so both survive restarts together.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::db_path;
use crate::engine::condition::ConditionKind;
use crate::error::DatabaseError;
use crate::period::PeriodKey;

/// A recorded condition occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub kind: ConditionKind,
    pub period: PeriodKey,
    /// User id for per-user conditions, absent for report deadlines.
    pub subject_id: Option<i64>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Absent while the event still awaits delivery.
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A durable popup notification addressed to the admin inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopupNotification {
    pub id: i64,
    pub snapshot_id: i64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// SQLite-backed store for snapshots and the popup queue.
pub struct SnapshotStore {
    conn: Connection,
}

/// Parse datetime from RFC3339 string with fallback to current time
fn parse_datetime_fallback(dt_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_snapshot(row: &rusqlite::Row) -> Result<Snapshot, rusqlite::Error> {
    let kind_str: String = row.get(1)?;
    let kind = ConditionKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown condition kind '{kind_str}'").into(),
        )
    })?;

    let period_str: String = row.get(2)?;
    let period = PeriodKey::parse(&period_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid period key '{period_str}'").into(),
        )
    })?;

    let payload_str: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_str).unwrap_or(Value::Null);

    let created_str: String = row.get(5)?;
    let delivered_str: Option<String> = row.get(6)?;

    Ok(Snapshot {
        id: row.get(0)?,
        kind,
        period,
        subject_id: row.get(3)?,
        payload,
        created_at: parse_datetime_fallback(&created_str),
        delivered_at: delivered_str.map(|s| parse_datetime_fallback(&s)),
    })
}

fn row_to_popup(row: &rusqlite::Row) -> Result<PopupNotification, rusqlite::Error> {
    let created_str: String = row.get(4)?;
    let read_str: Option<String> = row.get(5)?;
    Ok(PopupNotification {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_datetime_fallback(&created_str),
        read_at: read_str.map(|s| parse_datetime_fallback(&s)),
    })
}

const SNAPSHOT_COLUMNS: &str =
    "id, condition_kind, period_key, subject_id, payload, created_at_utc, delivered_at_utc";

impl SnapshotStore {
    /// Open the store at the configured database path.
    ///
    /// Creates the tables if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        Self::open_at(&db_path()?)
    }

    /// Open the store at an explicit path (tests, embedding).
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for tests).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                condition_kind   TEXT NOT NULL,
                period_key       TEXT NOT NULL,
                subject_id       INTEGER,
                payload          TEXT NOT NULL DEFAULT '{}',
                created_at_utc   TEXT NOT NULL,
                delivered_at_utc TEXT
            );

            -- The dedup invariant: at most one snapshot per condition tuple.
            -- NULL subjects must collide, hence the IFNULL projection.
            CREATE UNIQUE INDEX IF NOT EXISTS ux_snapshots_condition
                ON snapshots(condition_kind, period_key, IFNULL(subject_id, -1));

            CREATE INDEX IF NOT EXISTS idx_snapshots_pending
                ON snapshots(id) WHERE delivered_at_utc IS NULL;

            CREATE TABLE IF NOT EXISTS popup_notifications (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_id    INTEGER NOT NULL UNIQUE,
                title          TEXT NOT NULL,
                body           TEXT NOT NULL,
                created_at_utc TEXT NOT NULL,
                read_at_utc    TEXT,
                FOREIGN KEY(snapshot_id) REFERENCES snapshots(id)
            );

            CREATE INDEX IF NOT EXISTS idx_popup_unread
                ON popup_notifications(id) WHERE read_at_utc IS NULL;",
        )?;
        Ok(())
    }

    /// Insert a snapshot for the condition tuple unless one already exists.
    ///
    /// Returns the stored snapshot and whether this call created it. A false
    /// flag is the normal idempotent path for repeated checks, not a failure.
    ///
    /// # Errors
    /// Returns an error if the insert or the readback fails.
    pub fn record_if_absent(
        &self,
        kind: ConditionKind,
        period: &PeriodKey,
        subject_id: Option<i64>,
        payload: &Value,
        at: DateTime<Utc>,
    ) -> Result<(Snapshot, bool), DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO snapshots
                (condition_kind, period_key, subject_id, payload, created_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                period.to_string(),
                subject_id,
                payload.to_string(),
                at.to_rfc3339(),
            ],
        )?;

        let snapshot = self
            .get(kind, period, subject_id)?
            .ok_or_else(|| DatabaseError::QueryFailed("snapshot vanished after insert".into()))?;
        Ok((snapshot, inserted > 0))
    }

    /// Look up the snapshot for a condition tuple.
    pub fn get(
        &self,
        kind: ConditionKind,
        period: &PeriodKey,
        subject_id: Option<i64>,
    ) -> Result<Option<Snapshot>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE condition_kind = ?1 AND period_key = ?2
               AND IFNULL(subject_id, -1) = IFNULL(?3, -1)"
        ))?;
        let snapshot = stmt
            .query_row(
                params![kind.as_str(), period.to_string(), subject_id],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Whether any snapshot exists for (kind, period), regardless of subject.
    ///
    /// Drives the CREATED-suppresses-MISSING rule.
    pub fn exists(&self, kind: ConditionKind, period: &PeriodKey) -> Result<bool, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT 1 FROM snapshots WHERE condition_kind = ?1 AND period_key = ?2 LIMIT 1",
        )?;
        let found = stmt
            .query_row(params![kind.as_str(), period.to_string()], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Set the delivered marker. No-op if it is already set, so duplicate
    /// dispatch attempts after a crash are harmless.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub fn mark_delivered(&self, snapshot_id: i64, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE snapshots SET delivered_at_utc = ?2
             WHERE id = ?1 AND delivered_at_utc IS NULL",
            params![snapshot_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Replace a snapshot's payload.
    ///
    /// Only the explicit reward-recompute action uses this; everything else
    /// treats payloads as immutable history.
    pub fn replace_payload(&self, snapshot_id: i64, payload: &Value) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE snapshots SET payload = ?2 WHERE id = ?1",
            params![snapshot_id, payload.to_string()],
        )?;
        Ok(())
    }

    /// Undelivered snapshots, oldest first, optionally filtered by kind
    /// and/or creation cutoff. Drives the dispatcher's work queue.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn pending_since(
        &self,
        kind: Option<ConditionKind>,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Snapshot>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE delivered_at_utc IS NULL
               AND (?1 IS NULL OR condition_kind = ?1)
               AND (?2 IS NULL OR created_at_utc < ?2)
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(
            params![kind.map(|k| k.as_str()), before.map(|b| b.to_rfc3339())],
            row_to_snapshot,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All snapshots for (kind, period), subject order. Feeds reward exports
    /// and report-history views.
    pub fn by_kind_and_period(
        &self,
        kind: ConditionKind,
        period: &PeriodKey,
    ) -> Result<Vec<Snapshot>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE condition_kind = ?1 AND period_key = ?2
             ORDER BY subject_id ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![kind.as_str(), period.to_string()], row_to_snapshot)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Most recent snapshots first, for audit/history views.
    pub fn history(&self, limit: usize) -> Result<Vec<Snapshot>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_snapshot)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Creation instant of the newest snapshot, if any. Used to detect clock
    /// skew between check points.
    pub fn latest_created_at(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT MAX(created_at_utc) FROM snapshots")?;
        let latest: Option<String> = stmt.query_row([], |row| row.get(0))?;
        Ok(latest.map(|s| parse_datetime_fallback(&s)))
    }

    /// Queue a popup for a snapshot. At most one popup ever exists per
    /// snapshot; redelivery attempts return false.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn enqueue_popup(
        &self,
        snapshot_id: i64,
        title: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO popup_notifications
                (snapshot_id, title, body, created_at_utc)
             VALUES (?1, ?2, ?3, ?4)",
            params![snapshot_id, title, body, at.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    /// Unread popups, oldest first.
    pub fn unread_popups(&self) -> Result<Vec<PopupNotification>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, snapshot_id, title, body, created_at_utc, read_at_utc
             FROM popup_notifications
             WHERE read_at_utc IS NULL
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_popup)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Mark every popup up to and including `up_to_id` as read.
    ///
    /// Returns how many rows changed. The caller's inbox cursor, not global
    /// UI state.
    pub fn mark_popups_read(
        &self,
        up_to_id: i64,
        at: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE popup_notifications SET read_at_utc = ?2
             WHERE id <= ?1 AND read_at_utc IS NULL",
            params![up_to_id, at.to_rfc3339()],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> PeriodKey {
        PeriodKey::Day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn record_if_absent_dedups() {
        let store = SnapshotStore::open_memory().unwrap();
        let now = Utc::now();
        let period = day(2024, 3, 15);

        let (first, was_new) = store
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &period,
                None,
                &json!({}),
                now,
            )
            .unwrap();
        assert!(was_new);

        let (second, was_new) = store
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &period,
                None,
                &json!({"ignored": true}),
                now,
            )
            .unwrap();
        assert!(!was_new);
        assert_eq!(first.id, second.id);
        // The original payload wins; the late payload is discarded.
        assert_eq!(second.payload, json!({}));
    }

    #[test]
    fn subjects_key_separately_but_null_collides() {
        let store = SnapshotStore::open_memory().unwrap();
        let now = Utc::now();
        let period = day(2024, 3, 15);

        let (_, a) = store
            .record_if_absent(ConditionKind::UserCreated, &period, Some(1), &json!({}), now)
            .unwrap();
        let (_, b) = store
            .record_if_absent(ConditionKind::UserCreated, &period, Some(2), &json!({}), now)
            .unwrap();
        let (_, c) = store
            .record_if_absent(ConditionKind::UserCreated, &period, None, &json!({}), now)
            .unwrap();
        let (_, d) = store
            .record_if_absent(ConditionKind::UserCreated, &period, None, &json!({}), now)
            .unwrap();
        assert!(a && b && c);
        assert!(!d);
    }

    #[test]
    fn mark_delivered_is_idempotent() {
        let store = SnapshotStore::open_memory().unwrap();
        let now = Utc::now();
        let (snap, _) = store
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &day(2024, 3, 15),
                None,
                &json!({}),
                now,
            )
            .unwrap();

        store.mark_delivered(snap.id, now).unwrap();
        let first = store
            .get(ConditionKind::DailyReportMissing, &day(2024, 3, 15), None)
            .unwrap()
            .unwrap()
            .delivered_at;

        let later = now + chrono::Duration::hours(1);
        store.mark_delivered(snap.id, later).unwrap();
        let second = store
            .get(ConditionKind::DailyReportMissing, &day(2024, 3, 15), None)
            .unwrap()
            .unwrap()
            .delivered_at;
        assert_eq!(first, second);
    }

    #[test]
    fn pending_since_orders_and_filters() {
        let store = SnapshotStore::open_memory().unwrap();
        let now = Utc::now();
        store
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &day(2024, 3, 14),
                None,
                &json!({}),
                now,
            )
            .unwrap();
        let (second, _) = store
            .record_if_absent(
                ConditionKind::UserCreated,
                &day(2024, 3, 15),
                Some(7),
                &json!({}),
                now,
            )
            .unwrap();

        let all = store.pending_since(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);

        let only_users = store
            .pending_since(Some(ConditionKind::UserCreated), None)
            .unwrap();
        assert_eq!(only_users.len(), 1);
        assert_eq!(only_users[0].id, second.id);

        store.mark_delivered(second.id, now).unwrap();
        assert_eq!(store.pending_since(None, None).unwrap().len(), 1);
    }

    #[test]
    fn popup_queue_is_at_most_once_per_snapshot() {
        let store = SnapshotStore::open_memory().unwrap();
        let now = Utc::now();
        let (snap, _) = store
            .record_if_absent(
                ConditionKind::DailyReportMissing,
                &day(2024, 3, 15),
                None,
                &json!({}),
                now,
            )
            .unwrap();

        assert!(store.enqueue_popup(snap.id, "t", "b", now).unwrap());
        assert!(!store.enqueue_popup(snap.id, "t2", "b2", now).unwrap());

        let unread = store.unread_popups().unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "t");

        assert_eq!(store.mark_popups_read(unread[0].id, now).unwrap(), 1);
        assert!(store.unread_popups().unwrap().is_empty());
    }

    proptest! {
        // However the same tuples are replayed, at most one row exists per tuple.
        #[test]
        fn uniqueness_survives_replays(ops in proptest::collection::vec((0u8..4, 0u8..3, proptest::option::of(0i64..3)), 1..40)) {
            let store = SnapshotStore::open_memory().unwrap();
            let now = Utc::now();
            let kinds = [
                ConditionKind::UserCreated,
                ConditionKind::DailyReportCreated,
                ConditionKind::DailyReportMissing,
                ConditionKind::RewardComputed,
            ];
            let mut distinct = std::collections::HashSet::new();
            for (k, d, subject) in ops {
                let kind = kinds[k as usize];
                let period = day(2024, 3, 10 + d as u32);
                distinct.insert((kind.as_str(), period.to_string(), subject));
                store
                    .record_if_absent(kind, &period, subject, &serde_json::json!({}), now)
                    .unwrap();
            }
            let total = store.history(1000).unwrap().len();
            prop_assert_eq!(total, distinct.len());
        }
    }
}
