//! Entity store contract and implementations.
//!
//! # Responsibility
//! - Define the async CRUD + field-query contract consumed by link and
//!   reference logic.
//! - Isolate storage details (in-memory arena, SQLite) behind one trait.
//!
//! # Invariants
//! - Stores never enforce adjacency symmetry; `LinkService` does.
//! - Reference codes are unique across notes and tasks at create time.
//! - Store APIs return semantic errors (`NotFound`) in addition to transport
//!   errors (`Unavailable`).

use crate::db::DbError;
use crate::model::note::{NewNote, Note, NoteId, NotePatch};
use crate::model::ref_code::RefCode;
use crate::model::task::{NewTask, Task, TaskId};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryEntityStore;
pub use sqlite::SqliteEntityStore;

/// Attempts at drawing a collision-free code before giving up.
pub(crate) const REF_CODE_ATTEMPTS: usize = 16;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from entity store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Target entity does not exist.
    NotFound(Uuid),
    /// Write would break a uniqueness constraint.
    Conflict(String),
    /// Transport or backend failure; the caller may retry.
    Unavailable(String),
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::Conflict(message) => write!(f, "store conflict: {message}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

/// Named collection for code lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Notes,
    Tasks,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Tasks => "tasks",
        }
    }
}

/// Async persistence contract for notes and tasks.
///
/// Every method is a suspension point; nothing else in this crate blocks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Inserts a detached note with a fresh or caller-provided unique code.
    async fn create_note(&self, request: NewNote) -> StoreResult<Note>;
    /// Inserts a task with a fresh or caller-provided unique code.
    async fn create_task(&self, request: NewTask) -> StoreResult<Task>;
    async fn get_note(&self, id: NoteId) -> StoreResult<Option<Note>>;
    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>>;
    /// Applies a partial field update; `NotFound` when the note is missing.
    async fn update_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<()>;
    /// Removes one note record; `NotFound` when the note is missing.
    async fn delete_note(&self, id: NoteId) -> StoreResult<()>;
    async fn find_note_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Note>>;
    async fn find_task_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Task>>;
    /// Notes with at least one adjacency field equal to `id`.
    async fn find_notes_pointing_to(&self, id: NoteId) -> StoreResult<Vec<Note>>;
    /// Notes with `is_home = true`.
    async fn find_home_notes(&self) -> StoreResult<Vec<Note>>;
    /// Every note, ordered by id.
    async fn list_notes(&self) -> StoreResult<Vec<Note>>;
}

/// Epoch milliseconds used for `updated_at` stamps.
pub(crate) fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
