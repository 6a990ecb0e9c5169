use std::{io, path::StripPrefixError, sync::mpsc::SendError};

use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use sqlx::{migrate::MigrateError, Error as SqlxError};
use thiserror::Error;

/// Build-engine error taxonomy.
///
/// `Config`, `Store` and `Internal` are fatal for the current build pass.
/// `Import` and `Render` are attributed to one source file / document and
/// collected without aborting the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum StrataError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Import failed for {path}: {reason}")]
    Import { path: String, reason: String },
    #[error("Render failed for {url}: {reason}")]
    Render { url: String, reason: String },
    #[error("Store error: {0}")]
    Store(String),
    #[error("Internal consistency error: {0}")]
    Internal(String),
    #[error("File system error: {0}")]
    Io(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl StrataError {
    /// Whether this error aborts the current build pass, as opposed to a
    /// per-item error collected into the build report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StrataError::Config(_) | StrataError::Store(_) | StrataError::Internal(_)
        )
    }

    /// Attribute an arbitrary error to one source file.
    pub fn import(path: impl ToString, reason: impl ToString) -> Self {
        StrataError::Import {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attribute an arbitrary error to one document url.
    pub fn render(url: impl ToString, reason: impl ToString) -> Self {
        StrataError::Render {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<io::Error> for StrataError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => StrataError::NotFound(format!("{x}")),
            _ => StrataError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<StripPrefixError> for StrataError {
    fn from(src: StripPrefixError) -> StrataError {
        StrataError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<serde_yaml::Error> for StrataError {
    fn from(src: serde_yaml::Error) -> StrataError {
        StrataError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<JsonError> for StrataError {
    fn from(src: JsonError) -> StrataError {
        StrataError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<regex::Error> for StrataError {
    fn from(src: regex::Error) -> StrataError {
        StrataError::Config(format!("Invalid handler pattern: {src}"))
    }
}

impl From<SqlxError> for StrataError {
    fn from(db_error: SqlxError) -> Self {
        StrataError::Store(format!("database error: {db_error}"))
    }
}

impl From<MigrateError> for StrataError {
    fn from(migrate_error: MigrateError) -> Self {
        // A database reporting versions this binary does not know about was
        // written by a newer build; refuse to touch it.
        match migrate_error {
            MigrateError::VersionMissing(v) => StrataError::Config(format!(
                "store schema version {v} is newer than this binary supports"
            )),
            MigrateError::VersionMismatch(v) => StrataError::Config(format!(
                "store schema version {v} was applied with different contents"
            )),
            other => StrataError::Store(format!("migration error: {other}")),
        }
    }
}

impl From<NotifyError> for StrataError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::PathNotFound => StrataError::NotFound(format!(
                "file watcher: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => StrataError::NotFound(format!(
                "file watcher: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => StrataError::Io(format!(
                "file watcher: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            other => StrataError::Internal(format!("file watcher: {other:?}")),
        }
    }
}

impl<T> From<SendError<T>> for StrataError {
    fn from(_: SendError<T>) -> Self {
        StrataError::Io("channel send failed, receiver dropped".to_string())
    }
}

impl From<tokio::task::JoinError> for StrataError {
    fn from(join_error: tokio::task::JoinError) -> Self {
        if join_error.is_cancelled() {
            StrataError::Cancelled
        } else {
            StrataError::Internal(format!("worker task panicked: {join_error}"))
        }
    }
}
