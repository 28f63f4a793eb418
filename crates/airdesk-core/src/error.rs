//! Core error types for airdesk-core.
//!
//! This module defines the error hierarchy using thiserror so that every
//! layer (storage, engine, rewards) can report precise failures.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for airdesk-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Template rendering errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Mail delivery errors
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Failed to access data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Template rendering errors.
///
/// A bad template degrades the email for the affected event only; the popup
/// channel falls back to a plain rendering.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// A placeholder in the template has no corresponding payload field
    #[error("placeholder '{name}' has no value in the event payload")]
    MissingPlaceholder { name: String },
}

/// Mail delivery errors.
///
/// An unconfigured transport is not an error: `resolve_mail_config` returns
/// `None` and the dispatcher skips the email channel.
#[derive(Error, Debug)]
pub enum MailError {
    /// Address failed to parse as a mailbox
    #[error("invalid mail address '{0}'")]
    InvalidAddress(String),

    /// Could not build or connect the SMTP transport
    #[error("mail transport error: {0}")]
    Transport(String),

    /// Delivery to one recipient failed
    #[error("sending to {recipient} failed: {reason}")]
    SendFailed { recipient: String, reason: String },
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(DatabaseError::from(err))
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
