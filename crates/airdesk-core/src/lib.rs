//! # Airdesk Core Library
//!
//! This library provides the core business logic for Airdesk, an internal
//! airport sales/reporting tool. It implements a CLI-first philosophy where
//! all operations are available via a standalone CLI binary, with the web
//! application being a thin layer over the same core library.
//!
//! ## Architecture
//!
//! - **Engine**: Detects state-transition events (missing reports, new or
//!   deleted accounts, finalized rewards) by diffing persisted snapshots
//!   against current data, then fans each event out to a durable popup queue
//!   and best-effort email
//! - **Storage**: SQLite-based stores for snapshots, accounts, report
//!   exports, fee data and structured settings
//! - **Rewards**: Computed variable rewards with manual overrides, frozen in
//!   snapshots so exported history never shifts
//!
//! ## Key Components
//!
//! - [`Engine`]: The assembled engine; `check_and_notify` is the check point
//! - [`SnapshotStore`]: Dedup key, delivery marker and audit log in one
//! - [`TriggerEvaluator`]: Condition rules with explicit instant/time zone
//! - [`NotificationDispatcher`]: Two-channel delivery with a `DeliveryReport`
//! - [`RewardManager`]: Finalize/recompute/export variable rewards

pub mod engine;
pub mod error;
pub mod period;
pub mod reward;
pub mod storage;

pub use engine::{
    CheckSummary, ConditionKind, DeliveryReport, Engine, EnvMailConfig, MailConfig, MailTransport,
    NotificationDispatcher, SmtpMailer, TriggerEvaluator,
};
pub use error::{CoreError, DatabaseError, MailError, TemplateError, ValidationError};
pub use period::{PeriodKey, REPORT_TZ};
pub use reward::{parse_euro_cents, RewardManager, RewardSnapshot};
pub use storage::{
    Database, MailSettings, PopupNotification, ReportExport, ReportKind, Role, SettingsStore,
    Snapshot, SnapshotStore, Template, UserRecord,
};
