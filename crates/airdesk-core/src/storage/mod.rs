mod settings;
pub mod database;
pub mod migrations;
pub mod snapshots;

pub use database::{Database, ReportExport, ReportKind, Role, Tombstone, UserRecord};
pub use settings::{MailSettings, SettingsStore, Template, MAX_RECIPIENTS};
pub use snapshots::{PopupNotification, Snapshot, SnapshotStore};

use std::path::PathBuf;

use crate::error::DatabaseError;

/// Returns `~/.config/airdesk[-dev]/` based on AIRDESK_ENV.
///
/// Set AIRDESK_ENV=dev to use a development data directory.
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, DatabaseError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("AIRDESK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("airdesk-dev")
    } else {
        base_dir.join("airdesk")
    };

    std::fs::create_dir_all(&dir).map_err(|e| DatabaseError::DataDir(e.to_string()))?;
    Ok(dir)
}

/// Path to the SQLite database file.
///
/// Honors the AIRDESK_DB_PATH override (useful for tests and ops tooling),
/// otherwise `<data_dir>/airdesk.db`.
pub fn db_path() -> Result<PathBuf, DatabaseError> {
    if let Ok(path) = std::env::var("AIRDESK_DB_PATH") {
        return Ok(PathBuf::from(path));
    }
    Ok(data_dir()?.join("airdesk.db"))
}
