//! Structured account settings.
//!
//! Stores admin-editable configuration as rows, not files:
//! - Notification recipient list (up to 10 addresses)
//! - Per-condition-kind notification templates
//! - Optional mail credentials overriding the environment defaults
//! - Reward commission rate
//!
//! The dispatcher re-reads settings on every delivery run, so edits take
//! effect at the next check point without a restart.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::db_path;
use crate::engine::condition::ConditionKind;
use crate::error::{CoreError, DatabaseError, ValidationError};

/// Maximum number of notification recipients.
pub const MAX_RECIPIENTS: usize = 10;

/// Commission rate applied to fee totals, in basis points.
const DEFAULT_COMMISSION_RATE_BPS: u32 = 500;

const KEY_RECIPIENTS: &str = "notification.recipients";
const KEY_MAIL: &str = "mail.smtp";
const KEY_COMMISSION_RATE: &str = "reward.commission_rate_bps";

fn template_key(kind: ConditionKind) -> String {
    format!("notification.template.{}", kind.as_str())
}

/// Admin-entered mail credentials. Any field may be blank; resolution decides
/// whether the set is usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSettings {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sender: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// A notification template with `{placeholder}` substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

/// SQLite-backed store for structured settings.
pub struct SettingsStore {
    conn: Connection,
}

impl SettingsStore {
    /// Open the store at the configured database path.
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
            "CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Get a raw setting value.
    pub fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM settings WHERE key = ?1")?;
        Ok(stmt
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?)
    }

    /// Set a raw setting value.
    pub fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // === Recipients ===

    /// Configured notification recipients, in order. Empty if never set.
    pub fn recipients(&self) -> Result<Vec<String>, DatabaseError> {
        match self.get(KEY_RECIPIENTS)? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the recipient list.
    ///
    /// # Errors
    /// Rejects more than [`MAX_RECIPIENTS`] addresses or an address without
    /// a '@'.
    pub fn set_recipients(&self, recipients: &[String]) -> Result<(), CoreError> {
        if recipients.len() > MAX_RECIPIENTS {
            return Err(ValidationError::InvalidValue {
                field: "recipients".into(),
                message: format!("at most {MAX_RECIPIENTS} addresses allowed"),
            }
            .into());
        }
        for address in recipients {
            if !address.contains('@') {
                return Err(ValidationError::InvalidValue {
                    field: "recipients".into(),
                    message: format!("'{address}' is not a mail address"),
                }
                .into());
            }
        }
        let raw = serde_json::to_string(recipients)?;
        self.set(KEY_RECIPIENTS, &raw)?;
        Ok(())
    }

    // === Templates ===

    /// Admin-edited template for a condition kind, if any.
    pub fn template_override(
        &self,
        kind: ConditionKind,
    ) -> Result<Option<Template>, DatabaseError> {
        match self.get(&template_key(kind))? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Store an edited template for a condition kind.
    pub fn set_template(&self, kind: ConditionKind, template: &Template) -> Result<(), CoreError> {
        let raw = serde_json::to_string(template)?;
        self.set(&template_key(kind), &raw)?;
        Ok(())
    }

    /// Drop an edited template, reverting to the built-in default.
    pub fn clear_template(&self, kind: ConditionKind) -> Result<(), DatabaseError> {
        self.conn.execute(
            "DELETE FROM settings WHERE key = ?1",
            params![template_key(kind)],
        )?;
        Ok(())
    }

    // === Mail ===

    /// Admin-entered mail credentials, if any.
    pub fn mail_settings(&self) -> Result<Option<MailSettings>, DatabaseError> {
        match self.get(KEY_MAIL)? {
            Some(raw) => Ok(serde_json::from_str(&raw).ok()),
            None => Ok(None),
        }
    }

    /// Store mail credentials.
    pub fn set_mail_settings(&self, mail: &MailSettings) -> Result<(), CoreError> {
        let raw = serde_json::to_string(mail)?;
        self.set(KEY_MAIL, &raw)?;
        Ok(())
    }

    // === Rewards ===

    /// Commission rate in basis points (default 500 = 5%).
    pub fn commission_rate_bps(&self) -> Result<u32, DatabaseError> {
        match self.get(KEY_COMMISSION_RATE)? {
            Some(raw) => Ok(raw.parse().unwrap_or(DEFAULT_COMMISSION_RATE_BPS)),
            None => Ok(DEFAULT_COMMISSION_RATE_BPS),
        }
    }

    /// Set the commission rate in basis points.
    ///
    /// # Errors
    /// Rejects rates above 10000 (100%).
    pub fn set_commission_rate_bps(&self, rate: u32) -> Result<(), CoreError> {
        if rate > 10_000 {
            return Err(ValidationError::InvalidValue {
                field: "commission_rate_bps".into(),
                message: "rate cannot exceed 10000".into(),
            }
            .into());
        }
        self.set(KEY_COMMISSION_RATE, &rate.to_string())?;
        Ok(())
    }
}
