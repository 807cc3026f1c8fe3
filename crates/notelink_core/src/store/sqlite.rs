//! SQLite-backed entity store.
//!
//! # Responsibility
//! - Persist notes/tasks in the migrated `notes` and `tasks` tables.
//! - Keep SQL details inside the store boundary.
//!
//! # Invariants
//! - Code uniqueness across both tables is checked inside an immediate
//!   transaction at create time (each table also has a `UNIQUE` column).
//! - Read paths reject invalid persisted state instead of masking it.

use crate::config::CoreConfig;
use crate::db::migrations::latest_version;
use crate::db::{open_db, open_db_in_memory};
use crate::model::note::{Direction, NewNote, Note, NoteFormat, NoteId, NotePatch};
use crate::model::ref_code::RefCode;
use crate::model::task::{NewTask, Task, TaskId, TaskStatus};
use crate::store::{now_epoch_ms, EntityStore, StoreError, StoreResult, REF_CODE_ATTEMPTS};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::path::Path;
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    uuid,
    title,
    content,
    format,
    up_uuid,
    down_uuid,
    left_uuid,
    right_uuid,
    is_home,
    is_starred,
    ref_code,
    updated_at
FROM notes";

const TASK_SELECT_SQL: &str = "SELECT
    uuid,
    text,
    status,
    due_at,
    ref_code,
    updated_at
FROM tasks";

/// `EntityStore` over one migrated SQLite connection.
pub struct SqliteEntityStore {
    conn: Mutex<Connection>,
}

impl SqliteEntityStore {
    /// Wraps an already migrated connection.
    pub fn try_new(conn: Connection) -> StoreResult<Self> {
        let version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if version != latest_version() {
            return Err(StoreError::Unavailable(format!(
                "entity store requires schema version {}, got {version}",
                latest_version()
            )));
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::try_new(open_db(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::try_new(open_db_in_memory()?)
    }

    /// Opens `config.db_path`, falling back to an in-memory database when
    /// no path is configured.
    pub fn open_from_config(config: &CoreConfig) -> StoreResult<Self> {
        match &config.db_path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn query_notes(&self, filter: &str, bind_values: Vec<Value>) -> StoreResult<Vec<Note>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{NOTE_SELECT_SQL} {filter}"))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(parse_note_row(row)?);
        }
        Ok(notes)
    }

    fn query_task(&self, filter: &str, bind_value: String) -> StoreResult<Option<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} {filter}"))?;
        let mut rows = stmt.query([bind_value])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn create_note(&self, request: NewNote) -> StoreResult<Note> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let code = claim_code_in_tx(&tx, request.ref_code.clone())?;
        let note = Note::from_new(request, code, now_epoch_ms());
        tx.execute(
            "INSERT INTO notes (
                uuid,
                title,
                content,
                format,
                is_home,
                is_starred,
                ref_code,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7);",
            params![
                note.id.to_string(),
                note.title.as_str(),
                note.content.as_str(),
                format_to_db(note.format),
                bool_to_int(note.is_starred),
                note.ref_code.as_str(),
                note.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(note)
    }

    async fn create_task(&self, request: NewTask) -> StoreResult<Task> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let code = claim_code_in_tx(&tx, request.ref_code.clone())?;
        let task = Task::from_new(request, code, now_epoch_ms());
        tx.execute(
            "INSERT INTO tasks (uuid, text, status, due_at, ref_code, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                task.id.to_string(),
                task.text.as_str(),
                task.status.as_str(),
                task.due_at,
                task.ref_code.as_str(),
                task.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(task)
    }

    async fn get_note(&self, id: NoteId) -> StoreResult<Option<Note>> {
        let mut notes = self.query_notes("WHERE uuid = ?1;", vec![Value::Text(id.to_string())])?;
        Ok(notes.pop())
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        self.query_task("WHERE uuid = ?1;", id.to_string())
    }

    async fn update_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<()> {
        let mut assignments = Vec::new();
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(title) = &patch.title {
            assignments.push("title = ?");
            bind_values.push(Value::Text(title.clone()));
        }
        for direction in Direction::ALL {
            if let Some(value) = patch.link_value(direction) {
                assignments.push(link_assignment(direction));
                bind_values.push(optional_id_value(value));
            }
        }
        if let Some(value) = patch.is_home {
            assignments.push("is_home = ?");
            bind_values.push(Value::Integer(bool_to_int(value)));
        }
        if let Some(value) = patch.is_starred {
            assignments.push("is_starred = ?");
            bind_values.push(Value::Integer(bool_to_int(value)));
        }
        assignments.push("updated_at = ?");
        bind_values.push(Value::Integer(now_epoch_ms()));
        bind_values.push(Value::Text(id.to_string()));

        let sql = format!(
            "UPDATE notes SET {} WHERE uuid = ?;",
            assignments.join(", ")
        );
        let changed = self
            .conn
            .lock()
            .execute(&sql, params_from_iter(bind_values))?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn delete_note(&self, id: NoteId) -> StoreResult<()> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM notes WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_note_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Note>> {
        let mut notes =
            self.query_notes("WHERE ref_code = ?1;", vec![Value::Text(code.to_string())])?;
        Ok(notes.pop())
    }

    async fn find_task_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Task>> {
        self.query_task("WHERE ref_code = ?1;", code.to_string())
    }

    async fn find_notes_pointing_to(&self, id: NoteId) -> StoreResult<Vec<Note>> {
        self.query_notes(
            "WHERE up_uuid = ?1 OR down_uuid = ?1 OR left_uuid = ?1 OR right_uuid = ?1
             ORDER BY uuid ASC;",
            vec![Value::Text(id.to_string())],
        )
    }

    async fn find_home_notes(&self) -> StoreResult<Vec<Note>> {
        self.query_notes("WHERE is_home = 1 ORDER BY uuid ASC;", Vec::new())
    }

    async fn list_notes(&self) -> StoreResult<Vec<Note>> {
        self.query_notes("ORDER BY uuid ASC;", Vec::new())
    }
}

fn claim_code_in_tx(tx: &Transaction<'_>, requested: Option<RefCode>) -> StoreResult<RefCode> {
    if let Some(code) = requested {
        if code_in_use(tx, &code)? {
            return Err(StoreError::Conflict(format!(
                "reference code `{code}` already in use"
            )));
        }
        return Ok(code);
    }
    for _ in 0..REF_CODE_ATTEMPTS {
        let code = RefCode::generate();
        if !code_in_use(tx, &code)? {
            return Ok(code);
        }
    }
    Err(StoreError::Conflict(
        "could not allocate a unique reference code".to_string(),
    ))
}

fn code_in_use(tx: &Transaction<'_>, code: &RefCode) -> StoreResult<bool> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE ref_code = ?1)
             OR EXISTS(SELECT 1 FROM tasks WHERE ref_code = ?1);",
        [code.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn link_assignment(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "up_uuid = ?",
        Direction::Down => "down_uuid = ?",
        Direction::Left => "left_uuid = ?",
        Direction::Right => "right_uuid = ?",
    }
}

fn optional_id_value(value: Option<NoteId>) -> Value {
    match value {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}

fn parse_note_row(row: &Row<'_>) -> StoreResult<Note> {
    let format_text: String = row.get("format")?;
    let format = parse_format(&format_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid note format `{format_text}` in notes.format"))
    })?;

    let mut note = Note {
        id: parse_uuid(&row.get::<_, String>("uuid")?, "notes.uuid")?,
        title: row.get("title")?,
        content: row.get("content")?,
        format,
        links: Default::default(),
        is_home: parse_bool(row.get("is_home")?, "notes.is_home")?,
        is_starred: parse_bool(row.get("is_starred")?, "notes.is_starred")?,
        ref_code: parse_ref_code(row.get("ref_code")?, "notes.ref_code")?,
        updated_at: row.get("updated_at")?,
    };
    for (direction, column) in [
        (Direction::Up, "up_uuid"),
        (Direction::Down, "down_uuid"),
        (Direction::Left, "left_uuid"),
        (Direction::Right, "right_uuid"),
    ] {
        let value = match row.get::<_, Option<String>>(column)? {
            Some(text) => Some(parse_uuid(&text, column)?),
            None => None,
        };
        note.links.set(direction, value);
    }
    Ok(note)
}

fn parse_task_row(row: &Row<'_>) -> StoreResult<Task> {
    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid task status `{status_text}` in tasks.status"))
    })?;
    Ok(Task {
        id: parse_uuid(&row.get::<_, String>("uuid")?, "tasks.uuid")?,
        text: row.get("text")?,
        status,
        due_at: row.get("due_at")?,
        ref_code: parse_ref_code(row.get("ref_code")?, "tasks.ref_code")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn parse_ref_code(value: String, column: &str) -> StoreResult<RefCode> {
    RefCode::try_from(value)
        .map_err(|err| StoreError::InvalidData(format!("{err} in {column}")))
}

fn parse_bool(value: i64, column: &str) -> StoreResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

fn format_to_db(format: NoteFormat) -> &'static str {
    match format {
        NoteFormat::Document => "document",
        NoteFormat::Diagram => "diagram",
    }
}

fn parse_format(value: &str) -> Option<NoteFormat> {
    match value {
        "document" => Some(NoteFormat::Document),
        "diagram" => Some(NoteFormat::Diagram),
        _ => None,
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
