//! Notification trigger & snapshot reconciliation engine.
//!
//! State transitions are detected purely by diffing current data against the
//! snapshot store, so the engine needs no queue, scheduler or in-memory
//! state: any check point after a deadline finds the condition, and restarts
//! lose nothing.
//!
//! Concurrent check points are safe without an in-process lock. The snapshot
//! store's atomic insert-if-missing is the dedup point and the popup queue's
//! uniqueness keeps that channel at-most-once per event; two overlapping
//! delivery runs can at worst both attempt email for the same event in the
//! window before the first marks it delivered, which the best-effort email
//! contract tolerates.

pub mod condition;
pub mod dispatcher;
pub mod evaluator;
pub mod mail;
pub mod templates;

pub use condition::ConditionKind;
pub use dispatcher::{DeliveryReport, NotificationDispatcher};
pub use evaluator::TriggerEvaluator;
pub use mail::{
    resolve_mail_config, resolve_recipients, EnvMailConfig, MailConfig, MailTransport, SmtpMailer,
};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{Database, PopupNotification, SettingsStore, SnapshotStore};

/// What a check point produced, renderable as the on-open popup list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    /// Conditions that became true at this check point.
    pub new_events: usize,
    /// Outcome of the delivery run.
    pub delivery: DeliveryReport,
    /// The admin's unread popup inbox after delivery.
    pub unread: Vec<PopupNotification>,
}

/// The assembled engine: stores plus a mail transport.
pub struct Engine {
    db: Database,
    snapshots: SnapshotStore,
    settings: SettingsStore,
    mailer: Box<dyn MailTransport>,
}

impl Engine {
    /// Open the engine against the configured database with the SMTP
    /// transport.
    ///
    /// # Errors
    /// Returns an error if any store cannot be opened.
    pub fn open() -> Result<Self> {
        Ok(Self {
            db: Database::open()?,
            snapshots: SnapshotStore::open()?,
            settings: SettingsStore::open()?,
            mailer: Box::new(SmtpMailer::default()),
        })
    }

    /// Assemble an engine from explicit parts (tests, embedding).
    pub fn with_parts(
        db: Database,
        snapshots: SnapshotStore,
        settings: SettingsStore,
        mailer: Box<dyn MailTransport>,
    ) -> Self {
        Self {
            db,
            snapshots,
            settings,
            mailer,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Run one check point: evaluate every trigger rule at `at`, deliver
    /// whatever is pending, and return the popup list.
    ///
    /// Invoked by the surrounding application on app open and after export
    /// actions.
    ///
    /// # Errors
    /// A storage failure aborts the remaining work; undelivered events stay
    /// pending for the next check point.
    pub fn check_and_notify(&self, at: DateTime<Utc>, tz: Tz) -> Result<CheckSummary> {
        let evaluator = TriggerEvaluator::new(&self.db, &self.snapshots);
        let fresh = evaluator.evaluate(at, tz)?;

        let dispatcher = NotificationDispatcher::new(
            &self.snapshots,
            &self.settings,
            self.mailer.as_ref(),
            EnvMailConfig::from_env(),
        );
        let delivery = dispatcher.deliver_pending(at)?;

        Ok(CheckSummary {
            new_events: fresh.len(),
            delivery,
            unread: self.snapshots.unread_popups()?,
        })
    }
}
