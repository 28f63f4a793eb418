//! Variable reward computation, overrides and snapshots.
//!
//! A reward is computed from the user's monthly airport-fee total and a
//! commission rate. Finalizing applies a manual override, if one exists, and
//! records the result through the snapshot store, so "reward finalized" is
//! just another trackable condition, delivered by the dispatcher like every
//! other event. Exports read the snapshots, never live fee data: the figures
//! an admin exports are exactly the figures that were (or will be) notified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::engine::condition::ConditionKind;
use crate::error::{CoreError, Result, ValidationError};
use crate::period::PeriodKey;
use crate::storage::{Database, SettingsStore, Snapshot, SnapshotStore};

/// A finalized reward, parsed back from its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub snapshot_id: i64,
    pub user_id: i64,
    pub period: PeriodKey,
    /// Amount derived from fee data at finalization time.
    pub computed_cents: i64,
    /// Manual override in effect at finalization time, if any.
    pub override_cents: Option<i64>,
    /// The amount that was reported: override if present, else computed.
    pub final_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl RewardSnapshot {
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self> {
        let user_id = snapshot.subject_id.ok_or_else(|| {
            CoreError::Validation(ValidationError::InvalidValue {
                field: "subject_id".into(),
                message: "reward snapshot has no user".into(),
            })
        })?;
        let field = |name: &str| -> Result<i64> {
            snapshot
                .payload
                .get(name)
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| {
                    CoreError::Validation(ValidationError::InvalidValue {
                        field: name.to_string(),
                        message: "missing from reward payload".into(),
                    })
                })
        };
        Ok(RewardSnapshot {
            snapshot_id: snapshot.id,
            user_id,
            period: snapshot.period,
            computed_cents: field("computed_cents")?,
            override_cents: snapshot
                .payload
                .get("override_cents")
                .and_then(serde_json::Value::as_i64),
            final_cents: field("final_cents")?,
            created_at: snapshot.created_at,
        })
    }
}

/// Parse a decimal euro amount ("1234.50", comma accepted) into cents.
pub fn parse_euro_cents(raw: &str) -> Option<i64> {
    let normalized = raw.trim().replace(',', ".");
    let (euros, cents) = match normalized.split_once('.') {
        Some((e, c)) => (e, c),
        None => (normalized.as_str(), ""),
    };
    let euros: i64 = euros.parse().ok()?;
    let cents: i64 = match cents.len() {
        0 => 0,
        1 => 10 * cents.parse::<i64>().ok()?,
        2 => cents.parse().ok()?,
        _ => return None,
    };
    let sign = if normalized.starts_with('-') { -1 } else { 1 };
    Some(euros * 100 + sign * cents)
}

/// Applies overrides on top of computed rewards and snapshots the result.
pub struct RewardManager<'a> {
    db: &'a Database,
    snapshots: &'a SnapshotStore,
    settings: &'a SettingsStore,
}

impl<'a> RewardManager<'a> {
    pub fn new(db: &'a Database, snapshots: &'a SnapshotStore, settings: &'a SettingsStore) -> Self {
        Self {
            db,
            snapshots,
            settings,
        }
    }

    /// Compute the variable reward for (user, period) from fee data.
    ///
    /// Pure over the stored fee totals and commission rate; no side effects.
    /// A user without fee data for the period computes to zero.
    pub fn compute_reward(&self, user_id: i64, period: &PeriodKey) -> Result<i64> {
        let fee_cents = self.db.fee_total(user_id, period)?.unwrap_or(0);
        let rate_bps = i64::from(self.settings.commission_rate_bps()?);
        Ok(fee_cents * rate_bps / 10_000)
    }

    /// Compute, apply any override, and record the reward snapshot.
    ///
    /// Idempotent: a second call for the same (user, period) returns the
    /// existing snapshot unchanged, even if fee data or overrides have moved
    /// since. Recorded history never shifts underneath an export; changing
    /// an already-finalized reward requires [`recompute_reward`].
    ///
    /// [`recompute_reward`]: RewardManager::recompute_reward
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub fn finalize_reward(
        &self,
        user_id: i64,
        period: &PeriodKey,
        at: DateTime<Utc>,
    ) -> Result<RewardSnapshot> {
        let computed = self.compute_reward(user_id, period)?;
        let override_cents = self.db.override_for(user_id, period)?;
        let final_cents = override_cents.unwrap_or(computed);
        let payload = json!({
            "computed_cents": computed,
            "override_cents": override_cents,
            "final_cents": final_cents,
        });
        let (snapshot, _was_new) = self.snapshots.record_if_absent(
            ConditionKind::RewardComputed,
            period,
            Some(user_id),
            &payload,
            at,
        )?;
        RewardSnapshot::from_snapshot(&snapshot)
    }

    /// Explicitly re-derive an already-finalized reward.
    ///
    /// Rewrites the payload of the existing snapshot in place (the snapshot
    /// row itself, and hence the dedup key and delivery marker, stay put).
    /// The surrounding application gates this behind admin confirmation.
    ///
    /// # Errors
    /// Fails if no reward was finalized for (user, period) yet.
    pub fn recompute_reward(
        &self,
        user_id: i64,
        period: &PeriodKey,
        _at: DateTime<Utc>,
    ) -> Result<RewardSnapshot> {
        let existing = self
            .snapshots
            .get(ConditionKind::RewardComputed, period, Some(user_id))?
            .ok_or_else(|| {
                CoreError::Validation(ValidationError::InvalidValue {
                    field: "reward".into(),
                    message: format!("no finalized reward for user {user_id} in {period}"),
                })
            })?;

        let computed = self.compute_reward(user_id, period)?;
        let override_cents = self.db.override_for(user_id, period)?;
        let final_cents = override_cents.unwrap_or(computed);
        let payload = json!({
            "computed_cents": computed,
            "override_cents": override_cents,
            "final_cents": final_cents,
        });
        self.snapshots.replace_payload(existing.id, &payload)?;

        let refreshed = self
            .snapshots
            .get(ConditionKind::RewardComputed, period, Some(user_id))?
            .ok_or_else(|| {
                CoreError::Database(crate::error::DatabaseError::QueryFailed(
                    "reward snapshot vanished during recompute".into(),
                ))
            })?;
        RewardSnapshot::from_snapshot(&refreshed)
    }

    /// Finalized reward for one user, if any.
    pub fn export_reward(
        &self,
        user_id: i64,
        period: &PeriodKey,
    ) -> Result<Option<RewardSnapshot>> {
        match self
            .snapshots
            .get(ConditionKind::RewardComputed, period, Some(user_id))?
        {
            Some(snapshot) => Ok(Some(RewardSnapshot::from_snapshot(&snapshot)?)),
            None => Ok(None),
        }
    }

    /// Every finalized reward for a period, user order.
    pub fn export_rewards(&self, period: &PeriodKey) -> Result<Vec<RewardSnapshot>> {
        self.snapshots
            .by_kind_and_period(ConditionKind::RewardComputed, period)?
            .iter()
            .map(RewardSnapshot::from_snapshot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> PeriodKey {
        PeriodKey::Month { year: y, month: m }
    }

    fn stores() -> (Database, SnapshotStore, SettingsStore) {
        (
            Database::open_memory().unwrap(),
            SnapshotStore::open_memory().unwrap(),
            SettingsStore::open_memory().unwrap(),
        )
    }

    #[test]
    fn euro_parsing() {
        assert_eq!(parse_euro_cents("0"), Some(0));
        assert_eq!(parse_euro_cents("120"), Some(12_000));
        assert_eq!(parse_euro_cents("95.5"), Some(9_550));
        assert_eq!(parse_euro_cents("150.00"), Some(15_000));
        assert_eq!(parse_euro_cents("1234,56"), Some(123_456));
        assert_eq!(parse_euro_cents("-9.50"), Some(-950));
        assert_eq!(parse_euro_cents("abc"), None);
        assert_eq!(parse_euro_cents("1.234"), None);
    }

    #[test]
    fn compute_uses_fee_total_and_rate() {
        let (db, snaps, settings) = stores();
        let manager = RewardManager::new(&db, &snaps, &settings);
        let period = month(2024, 6);
        let now = Utc::now();

        assert_eq!(manager.compute_reward(1, &period).unwrap(), 0);

        // 2400.00 EUR in fees at the default 5% -> 120.00 EUR.
        db.set_fee_total(1, &period, 240_000, now).unwrap();
        assert_eq!(manager.compute_reward(1, &period).unwrap(), 12_000);

        settings.set_commission_rate_bps(1_000).unwrap();
        assert_eq!(manager.compute_reward(1, &period).unwrap(), 24_000);
    }

    #[test]
    fn finalize_is_idempotent_and_frozen() {
        let (db, snaps, settings) = stores();
        let manager = RewardManager::new(&db, &snaps, &settings);
        let period = month(2024, 6);
        let now = Utc::now();

        db.set_fee_total(1, &period, 240_000, now).unwrap();
        let first = manager.finalize_reward(1, &period, now).unwrap();
        assert_eq!(first.final_cents, 12_000);
        assert_eq!(first.override_cents, None);

        // Fee data moves afterwards; the snapshot does not.
        db.set_fee_total(1, &period, 999_900, now).unwrap();
        let second = manager.finalize_reward(1, &period, now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn late_override_needs_explicit_recompute() {
        let (db, snaps, settings) = stores();
        let manager = RewardManager::new(&db, &snaps, &settings);
        let period = month(2024, 6);
        let now = Utc::now();

        db.set_fee_total(2, &period, 190_000, now).unwrap();
        let finalized = manager.finalize_reward(2, &period, now).unwrap();
        assert_eq!(finalized.final_cents, 9_500);

        db.set_override(2, &period, 15_000, now).unwrap();
        // Still frozen.
        let still = manager.finalize_reward(2, &period, now).unwrap();
        assert_eq!(still.final_cents, 9_500);

        let recomputed = manager.recompute_reward(2, &period, now).unwrap();
        assert_eq!(recomputed.final_cents, 15_000);
        assert_eq!(recomputed.computed_cents, 9_500);
        assert_eq!(recomputed.override_cents, Some(15_000));
        assert_eq!(recomputed.snapshot_id, finalized.snapshot_id);
    }

    #[test]
    fn recompute_requires_prior_finalize() {
        let (db, snaps, settings) = stores();
        let manager = RewardManager::new(&db, &snaps, &settings);
        assert!(manager
            .recompute_reward(9, &month(2024, 6), Utc::now())
            .is_err());
    }

    #[test]
    fn export_scenario_with_override() {
        let (db, snaps, settings) = stores();
        let manager = RewardManager::new(&db, &snaps, &settings);
        let period = month(2024, 6);
        let now = Utc::now();

        // User A: computed 120.00, no override.
        db.set_fee_total(1, &period, 240_000, now).unwrap();
        // User B: computed 95.00, overridden to 150.00 before finalization.
        db.set_fee_total(2, &period, 190_000, now).unwrap();
        db.set_override(2, &period, 15_000, now).unwrap();

        manager.finalize_reward(1, &period, now).unwrap();
        manager.finalize_reward(2, &period, now).unwrap();

        let exported = manager.export_rewards(&period).unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].user_id, 1);
        assert_eq!(exported[0].final_cents, 12_000);
        assert_eq!(exported[1].user_id, 2);
        assert_eq!(exported[1].final_cents, 15_000);
        assert_eq!(exported[1].computed_cents, 9_500);

        let single = manager.export_reward(2, &period).unwrap().unwrap();
        assert_eq!(single.final_cents, 15_000);
        assert!(manager.export_reward(3, &period).unwrap().is_none());
    }
}
