//! Trigger evaluation.
//!
//! Runs once per check point and compares current facts (accounts,
//! tombstones, report exports) against the snapshot store. A rule that
//! evaluates true records a snapshot; only snapshots created by this call
//! become events for the dispatcher. Rules are independent, except that a
//! CREATED snapshot for a period suppresses the matching MISSING rule,
//! checked against the store, never via in-memory state.
//!
//! The evaluation instant and time zone are explicit parameters: rule logic
//! never reads the ambient clock, so deadlines are testable with fixed
//! instants and stay correct across DST changes.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::warn;

use crate::engine::condition::ConditionKind;
use crate::error::Result;
use crate::period::{deadline_passed, is_first_of_month, PeriodKey};
use crate::storage::{Database, ReportKind, Snapshot, SnapshotStore};

/// Compares source-of-truth data against recorded snapshots.
pub struct TriggerEvaluator<'a> {
    db: &'a Database,
    snapshots: &'a SnapshotStore,
}

impl<'a> TriggerEvaluator<'a> {
    pub fn new(db: &'a Database, snapshots: &'a SnapshotStore) -> Self {
        Self { db, snapshots }
    }

    /// Evaluate every rule at the given instant. Returns the snapshots this
    /// call created, oldest rule first.
    ///
    /// # Errors
    /// A storage failure aborts the remaining rules; snapshots already
    /// recorded stay pending and are picked up at the next check point.
    pub fn evaluate(&self, at: DateTime<Utc>, tz: Tz) -> Result<Vec<Snapshot>> {
        // A check point earlier than the newest snapshot means the wall
        // clock moved backwards. Rules still evaluate against `at` as-is;
        // deadline decisions are never unwound.
        if let Some(latest) = self.snapshots.latest_created_at()? {
            if at < latest {
                warn!(
                    evaluated_at = %at,
                    latest_snapshot = %latest,
                    "check point instant is earlier than the newest snapshot"
                );
            }
        }

        let mut fresh = Vec::new();
        self.scan_pending_users(at, tz, &mut fresh)?;
        self.scan_tombstones(at, tz, &mut fresh)?;
        self.scan_report_exports(at, &mut fresh)?;
        self.check_daily_deadline(at, tz, &mut fresh)?;
        self.check_monthly_deadline(at, tz, &mut fresh)?;
        Ok(fresh)
    }

    /// USER_CREATED: an account waiting for approval, not yet snapshotted.
    fn scan_pending_users(
        &self,
        at: DateTime<Utc>,
        tz: Tz,
        fresh: &mut Vec<Snapshot>,
    ) -> Result<()> {
        for user in self.db.users_pending_approval()? {
            let period = PeriodKey::day_of(user.created_at, tz);
            let payload = json!({
                "fullname": user.fullname,
                "nickname": user.nickname,
            });
            let (snapshot, was_new) = self.snapshots.record_if_absent(
                ConditionKind::UserCreated,
                &period,
                Some(user.id),
                &payload,
                at,
            )?;
            if was_new {
                fresh.push(snapshot);
            }
        }
        Ok(())
    }

    /// USER_DELETED: detected via tombstone records, not row absence.
    fn scan_tombstones(&self, at: DateTime<Utc>, tz: Tz, fresh: &mut Vec<Snapshot>) -> Result<()> {
        for tombstone in self.db.list_tombstones()? {
            let period = PeriodKey::day_of(tombstone.deleted_at, tz);
            let payload = json!({
                "fullname": tombstone.fullname,
                "nickname": tombstone.nickname,
            });
            let (snapshot, was_new) = self.snapshots.record_if_absent(
                ConditionKind::UserDeleted,
                &period,
                Some(tombstone.user_id),
                &payload,
                at,
            )?;
            if was_new {
                fresh.push(snapshot);
            }
        }
        Ok(())
    }

    /// DAILY_REPORT_CREATED / MONTHLY_REPORT_CREATED: a recorded export not
    /// yet snapshotted. The first export of a period wins the snapshot.
    fn scan_report_exports(&self, at: DateTime<Utc>, fresh: &mut Vec<Snapshot>) -> Result<()> {
        for export in self.db.report_exports()? {
            let kind = match export.kind {
                ReportKind::Daily => ConditionKind::DailyReportCreated,
                ReportKind::Monthly => ConditionKind::MonthlyReportCreated,
            };
            let payload = json!({
                "entry_count": export.entry_count,
                "total_cents": export.total_cents,
            });
            let (snapshot, was_new) =
                self.snapshots
                    .record_if_absent(kind, &export.period, None, &payload, at)?;
            if was_new {
                fresh.push(snapshot);
            }
        }
        Ok(())
    }

    /// DAILY_REPORT_MISSING: past 08:00 local with no export snapshot for
    /// today. A report arriving later still records its own CREATED snapshot;
    /// the two kinds are deliberately independent.
    fn check_daily_deadline(
        &self,
        at: DateTime<Utc>,
        tz: Tz,
        fresh: &mut Vec<Snapshot>,
    ) -> Result<()> {
        if !deadline_passed(at, tz) {
            return Ok(());
        }
        let today = PeriodKey::day_of(at, tz);
        if self
            .snapshots
            .exists(ConditionKind::DailyReportCreated, &today)?
        {
            return Ok(());
        }
        let (snapshot, was_new) = self.snapshots.record_if_absent(
            ConditionKind::DailyReportMissing,
            &today,
            None,
            &json!({}),
            at,
        )?;
        if was_new {
            fresh.push(snapshot);
        }
        Ok(())
    }

    /// MONTHLY_REPORT_MISSING: on the first of the month past 08:00 local,
    /// with no export snapshot for the previous month.
    fn check_monthly_deadline(
        &self,
        at: DateTime<Utc>,
        tz: Tz,
        fresh: &mut Vec<Snapshot>,
    ) -> Result<()> {
        if !is_first_of_month(at, tz) || !deadline_passed(at, tz) {
            return Ok(());
        }
        let previous = PeriodKey::previous_month_of(at, tz);
        if self
            .snapshots
            .exists(ConditionKind::MonthlyReportCreated, &previous)?
        {
            return Ok(());
        }
        let (snapshot, was_new) = self.snapshots.record_if_absent(
            ConditionKind::MonthlyReportMissing,
            &previous,
            None,
            &json!({}),
            at,
        )?;
        if was_new {
            fresh.push(snapshot);
        }
        Ok(())
    }
}
