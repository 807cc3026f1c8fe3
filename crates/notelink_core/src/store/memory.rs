//! In-memory entity store.
//!
//! Arena of id-keyed records behind one mutex. Used by tests and by hosts
//! that keep their own persistence.

use crate::model::note::{NewNote, Note, NoteId, NotePatch};
use crate::model::ref_code::RefCode;
use crate::model::task::{NewTask, Task, TaskId};
use crate::store::{now_epoch_ms, EntityStore, StoreError, StoreResult, REF_CODE_ATTEMPTS};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Arena {
    notes: HashMap<NoteId, Note>,
    tasks: HashMap<TaskId, Task>,
}

impl Arena {
    fn code_in_use(&self, code: &RefCode) -> bool {
        self.notes.values().any(|note| &note.ref_code == code)
            || self.tasks.values().any(|task| &task.ref_code == code)
    }

    fn claim_code(&self, requested: Option<RefCode>) -> StoreResult<RefCode> {
        if let Some(code) = requested {
            if self.code_in_use(&code) {
                return Err(StoreError::Conflict(format!(
                    "reference code `{code}` already in use"
                )));
            }
            return Ok(code);
        }
        for _ in 0..REF_CODE_ATTEMPTS {
            let code = RefCode::generate();
            if !self.code_in_use(&code) {
                return Ok(code);
            }
        }
        Err(StoreError::Conflict(
            "could not allocate a unique reference code".to_string(),
        ))
    }
}

/// Mutex-guarded arena implementing `EntityStore`.
#[derive(Default)]
pub struct MemoryEntityStore {
    arena: Mutex<Arena>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored notes.
    pub fn note_count(&self) -> usize {
        self.arena.lock().notes.len()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn create_note(&self, request: NewNote) -> StoreResult<Note> {
        let mut arena = self.arena.lock();
        let code = arena.claim_code(request.ref_code.clone())?;
        let note = Note::from_new(request, code, now_epoch_ms());
        arena.notes.insert(note.id, note.clone());
        Ok(note)
    }

    async fn create_task(&self, request: NewTask) -> StoreResult<Task> {
        let mut arena = self.arena.lock();
        let code = arena.claim_code(request.ref_code.clone())?;
        let task = Task::from_new(request, code, now_epoch_ms());
        arena.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_note(&self, id: NoteId) -> StoreResult<Option<Note>> {
        Ok(self.arena.lock().notes.get(&id).cloned())
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.arena.lock().tasks.get(&id).cloned())
    }

    async fn update_note(&self, id: NoteId, patch: &NotePatch) -> StoreResult<()> {
        let mut arena = self.arena.lock();
        let note = arena.notes.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply_to(note);
        note.updated_at = now_epoch_ms();
        Ok(())
    }

    async fn delete_note(&self, id: NoteId) -> StoreResult<()> {
        self.arena
            .lock()
            .notes
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_note_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Note>> {
        Ok(self
            .arena
            .lock()
            .notes
            .values()
            .find(|note| &note.ref_code == code)
            .cloned())
    }

    async fn find_task_by_ref_code(&self, code: &RefCode) -> StoreResult<Option<Task>> {
        Ok(self
            .arena
            .lock()
            .tasks
            .values()
            .find(|task| &task.ref_code == code)
            .cloned())
    }

    async fn find_notes_pointing_to(&self, id: NoteId) -> StoreResult<Vec<Note>> {
        let mut notes: Vec<Note> = self
            .arena
            .lock()
            .notes
            .values()
            .filter(|note| !note.links.directions_to(id).is_empty())
            .cloned()
            .collect();
        notes.sort_by_key(|note| note.id);
        Ok(notes)
    }

    async fn find_home_notes(&self) -> StoreResult<Vec<Note>> {
        let mut notes: Vec<Note> = self
            .arena
            .lock()
            .notes
            .values()
            .filter(|note| note.is_home)
            .cloned()
            .collect();
        notes.sort_by_key(|note| note.id);
        Ok(notes)
    }

    async fn list_notes(&self) -> StoreResult<Vec<Note>> {
        let mut notes: Vec<Note> = self.arena.lock().notes.values().cloned().collect();
        notes.sort_by_key(|note| note.id);
        Ok(notes)
    }
}
