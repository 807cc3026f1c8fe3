//! SQLite bootstrap for the note/task entity store.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing `SqliteEntityStore`.
//! - Bring the `notes`/`tasks` schema up to date before any store call.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No note/task data is read or written before migrations succeed.
//! - A failed migration rolls back every migration of the same open.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while opening or migrating the entity store database.
#[derive(Debug)]
pub enum DbError {
    /// The database file could not be opened at all.
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    /// Migration `version` failed; the schema stays at its previous version.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The file was written by a newer build with a schema this one cannot read.
    SchemaTooNew { found: u32, supported: u32 },
    /// Pragma setup or version bookkeeping failed.
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Whether a later open of the same file can succeed without a newer build.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SchemaTooNew { .. })
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open entity store `{}`: {source}", path.display())
            }
            Self::Migration { version, source } => {
                write!(f, "entity store migration {version} failed: {source}")
            }
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "entity store schema version {found} is newer than supported {supported}"
            ),
            Self::Sqlite(err) => write!(f, "entity store bootstrap failed: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
