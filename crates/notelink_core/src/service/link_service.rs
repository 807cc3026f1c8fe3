//! Link consistency use-case service.
//!
//! # Responsibility
//! - Own every write to note adjacency fields and the home flag.
//! - Keep the four-direction graph symmetric across multi-record writes.
//!
//! # Invariants
//! - `A.up = B <=> B.down = A` and `A.left = B <=> B.right = A`; no self-links.
//! - At most one note has `is_home = true`.
//! - Every operation is retry-safe: re-invoking after a partial failure
//!   converges to the state of an uninterrupted call.
//! - Clears of old pointers are written before new pointers are set, and the
//!   pointer a retry keys on is always written last.

use crate::model::note::{Adjacency, Direction, NewNote, Note, NoteId, NotePatch};
use crate::store::{EntityStore, StoreError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Multi-write operation names, used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOperation {
    SetLink,
    RemoveLink,
    SetHome,
    ClearHome,
    DeleteNote,
}

impl LinkOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetLink => "set_link",
            Self::RemoveLink => "remove_link",
            Self::SetHome => "set_home",
            Self::ClearHome => "clear_home",
            Self::DeleteNote => "delete_note",
        }
    }
}

/// Errors from link service operations.
#[derive(Debug)]
pub enum LinkServiceError {
    /// Source or target note does not exist.
    NoteNotFound(NoteId),
    /// Source and target are the same note.
    SelfLink(NoteId),
    /// Some writes landed before a store failure; retry the same call.
    PartialWrite {
        operation: LinkOperation,
        completed: usize,
        source: StoreError,
    },
    /// The previous home was cleared but the new one could not be set.
    HomeUnset { note_id: NoteId, source: StoreError },
    /// Store failure before any write landed.
    Store(StoreError),
}

impl Display for LinkServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::SelfLink(id) => write!(f, "note cannot link to itself: {id}"),
            Self::PartialWrite {
                operation,
                completed,
                source,
            } => write!(
                f,
                "{} partially applied after {completed} write(s), retry required: {source}",
                operation.as_str()
            ),
            Self::HomeUnset { note_id, source } => write!(
                f,
                "home cleared but could not be set on {note_id}, retry required: {source}"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LinkServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::PartialWrite { source, .. } => Some(source),
            Self::HomeUnset { source, .. } => Some(source),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for LinkServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(id) => Self::NoteNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl LinkServiceError {
    /// Whether re-invoking the same call is the expected recovery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PartialWrite { .. }
                | Self::HomeUnset { .. }
                | Self::Store(StoreError::Unavailable(_))
        )
    }
}

/// One inconsistency found by `LinkService::audit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkViolation {
    SelfLink {
        note_id: NoteId,
        direction: Direction,
    },
    /// Field points at a note that no longer exists.
    Dangling {
        note_id: NoteId,
        direction: Direction,
        target: NoteId,
    },
    /// Field is not mirrored by the target's paired field.
    Asymmetric {
        note_id: NoteId,
        direction: Direction,
        target: NoteId,
    },
    MultipleHomes(Vec<NoteId>),
}

/// Tracks how many writes of one operation have landed.
struct WritePlan<'a, S: EntityStore + ?Sized> {
    store: &'a S,
    operation: LinkOperation,
    completed: usize,
}

impl<'a, S: EntityStore + ?Sized> WritePlan<'a, S> {
    fn new(store: &'a S, operation: LinkOperation) -> Self {
        Self {
            store,
            operation,
            completed: 0,
        }
    }

    fn fail(&self, source: StoreError) -> LinkServiceError {
        warn!(
            "event=link_write module=links status=error op={} completed={} error={}",
            self.operation.as_str(),
            self.completed,
            source
        );
        if self.completed == 0 {
            LinkServiceError::from(source)
        } else {
            LinkServiceError::PartialWrite {
                operation: self.operation,
                completed: self.completed,
                source,
            }
        }
    }

    async fn write(&mut self, id: NoteId, patch: &NotePatch) -> Result<(), LinkServiceError> {
        match self.store.update_note(id, patch).await {
            Ok(()) => {
                self.completed += 1;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Clears `id.direction` only while it still equals `expected`.
    ///
    /// A vanished note or an already-moved pointer counts as cleared.
    async fn clear_if_points(
        &mut self,
        id: NoteId,
        direction: Direction,
        expected: NoteId,
    ) -> Result<(), LinkServiceError> {
        let current = match self.store.get_note(id).await {
            Ok(Some(note)) => note.neighbor(direction),
            Ok(None) => return Ok(()),
            Err(err) => return Err(self.fail(err)),
        };
        if current != Some(expected) {
            return Ok(());
        }
        match self
            .store
            .update_note(id, &NotePatch::link(direction, None))
            .await
        {
            Ok(()) => {
                self.completed += 1;
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }
}

/// Link consistency facade over an entity store.
pub struct LinkService<S: EntityStore> {
    store: Arc<S>,
    // Serializes multi-write operations issued through this instance.
    write_gate: Mutex<()>,
}

impl<S: EntityStore> LinkService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            write_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Creates a detached note (no neighbors, not home).
    pub async fn create_note(&self, request: NewNote) -> Result<Note, LinkServiceError> {
        let note = self.store.create_note(request).await?;
        info!(
            "event=note_create module=links status=ok note={} code={}",
            note.id, note.ref_code
        );
        Ok(note)
    }

    /// Returns the four neighbor ids of one note.
    pub async fn neighbors(&self, note_id: NoteId) -> Result<Adjacency, LinkServiceError> {
        Ok(self.require_note(note_id).await?.links)
    }

    /// Points `source.direction` at `target` and `target.opposite` at `source`.
    ///
    /// A previous neighbor of `source` in `direction` and a previous partner of
    /// `target` in the paired direction are unlinked first.
    pub async fn set_link(
        &self,
        source_id: NoteId,
        target_id: NoteId,
        direction: Direction,
    ) -> Result<(), LinkServiceError> {
        if source_id == target_id {
            return Err(LinkServiceError::SelfLink(source_id));
        }
        let _guard = self.write_gate.lock().await;
        let source = self.require_note(source_id).await?;
        let target = self.require_note(target_id).await?;
        let paired = direction.opposite();

        if source.neighbor(direction) == Some(target_id)
            && target.neighbor(paired) == Some(source_id)
        {
            debug!(
                "event=link_set module=links status=noop source={source_id} target={target_id} direction={}",
                direction.as_str()
            );
            return Ok(());
        }

        let mut plan = WritePlan::new(self.store.as_ref(), LinkOperation::SetLink);
        if let Some(old) = source.neighbor(direction).filter(|id| *id != target_id) {
            plan.clear_if_points(old, paired, source_id).await?;
        }
        if let Some(previous) = target.neighbor(paired).filter(|id| *id != source_id) {
            plan.clear_if_points(previous, direction, target_id).await?;
        }
        plan.write(target_id, &NotePatch::link(paired, Some(source_id)))
            .await?;
        plan.write(source_id, &NotePatch::link(direction, Some(target_id)))
            .await?;

        info!(
            "event=link_set module=links status=ok source={source_id} target={target_id} direction={} writes={}",
            direction.as_str(),
            plan.completed
        );
        Ok(())
    }

    /// Unlinks `source` in `direction`; a no-op when there is no neighbor.
    pub async fn remove_link(
        &self,
        source_id: NoteId,
        direction: Direction,
    ) -> Result<(), LinkServiceError> {
        let _guard = self.write_gate.lock().await;
        let source = self.require_note(source_id).await?;
        let Some(neighbor) = source.neighbor(direction) else {
            debug!(
                "event=link_remove module=links status=noop source={source_id} direction={}",
                direction.as_str()
            );
            return Ok(());
        };

        let mut plan = WritePlan::new(self.store.as_ref(), LinkOperation::RemoveLink);
        plan.clear_if_points(neighbor, direction.opposite(), source_id)
            .await?;
        plan.write(source_id, &NotePatch::link(direction, None))
            .await?;

        info!(
            "event=link_remove module=links status=ok source={source_id} neighbor={neighbor} direction={}",
            direction.as_str()
        );
        Ok(())
    }

    /// Moves the home flag to `note_id`.
    ///
    /// # Errors
    /// - `HomeUnset` when the previous home was cleared but the new flag could
    ///   not be written; no note is home until the call is retried.
    pub async fn set_home(&self, note_id: NoteId) -> Result<(), LinkServiceError> {
        let _guard = self.write_gate.lock().await;
        self.require_note(note_id).await?;
        let holders = self.store.find_home_notes().await?;
        if holders.len() == 1 && holders[0].id == note_id {
            return Ok(());
        }

        let mut plan = WritePlan::new(self.store.as_ref(), LinkOperation::SetHome);
        for holder in holders.iter().filter(|note| note.id != note_id) {
            match self.store.update_note(holder.id, &NotePatch::home(false)).await {
                Ok(()) | Err(StoreError::NotFound(_)) => plan.completed += 1,
                Err(err) => return Err(plan.fail(err)),
            }
        }

        if let Err(source) = self.store.update_note(note_id, &NotePatch::home(true)).await {
            if plan.completed == 0 {
                return Err(plan.fail(source));
            }
            warn!(
                "event=home_set module=links status=error note={note_id} error_code=home_unset error={source}"
            );
            return Err(LinkServiceError::HomeUnset { note_id, source });
        }

        info!(
            "event=home_set module=links status=ok note={note_id} cleared={}",
            plan.completed
        );
        Ok(())
    }

    /// Clears the home flag on every holder.
    pub async fn clear_home(&self) -> Result<(), LinkServiceError> {
        let _guard = self.write_gate.lock().await;
        let holders = self.store.find_home_notes().await?;
        let mut plan = WritePlan::new(self.store.as_ref(), LinkOperation::ClearHome);
        for holder in &holders {
            match self.store.update_note(holder.id, &NotePatch::home(false)).await {
                Ok(()) | Err(StoreError::NotFound(_)) => plan.completed += 1,
                Err(err) => return Err(plan.fail(err)),
            }
        }
        Ok(())
    }

    /// Current home note, if any.
    pub async fn home(&self) -> Result<Option<Note>, LinkServiceError> {
        let mut holders = self.store.find_home_notes().await?;
        if holders.len() > 1 {
            warn!(
                "event=home_get module=links status=inconsistent holders={}",
                holders.len()
            );
        }
        Ok(if holders.is_empty() {
            None
        } else {
            Some(holders.remove(0))
        })
    }

    /// Clears every field pointing at `note_id`, then deletes the record.
    ///
    /// Deleting an id that is already gone still clears stale pointers and
    /// returns `Ok`, so retries after a partial failure converge.
    pub async fn delete_note(&self, note_id: NoteId) -> Result<(), LinkServiceError> {
        let _guard = self.write_gate.lock().await;
        let pointing = self.store.find_notes_pointing_to(note_id).await?;

        let mut plan = WritePlan::new(self.store.as_ref(), LinkOperation::DeleteNote);
        for note in pointing.iter().filter(|note| note.id != note_id) {
            let mut patch = NotePatch::default();
            for direction in note.links.directions_to(note_id) {
                patch = patch.with_link(direction, None);
            }
            match self.store.update_note(note.id, &patch).await {
                Ok(()) | Err(StoreError::NotFound(_)) => plan.completed += 1,
                Err(err) => return Err(plan.fail(err)),
            }
        }

        match self.store.delete_note(note_id).await {
            Ok(()) => {
                info!(
                    "event=note_delete module=links status=ok note={note_id} cleared={}",
                    plan.completed
                );
                Ok(())
            }
            Err(StoreError::NotFound(_)) => {
                debug!(
                    "event=note_delete module=links status=noop note={note_id} cleared={}",
                    plan.completed
                );
                Ok(())
            }
            Err(err) => Err(plan.fail(err)),
        }
    }

    /// Scans every note and reports invariant violations. Read-only.
    pub async fn audit(&self) -> Result<Vec<LinkViolation>, LinkServiceError> {
        let notes = self.store.list_notes().await?;
        let by_id: HashMap<NoteId, &Note> = notes.iter().map(|note| (note.id, note)).collect();
        let mut violations = Vec::new();

        for note in &notes {
            for direction in Direction::ALL {
                let Some(target) = note.neighbor(direction) else {
                    continue;
                };
                if target == note.id {
                    violations.push(LinkViolation::SelfLink {
                        note_id: note.id,
                        direction,
                    });
                    continue;
                }
                match by_id.get(&target) {
                    None => violations.push(LinkViolation::Dangling {
                        note_id: note.id,
                        direction,
                        target,
                    }),
                    Some(other) if other.neighbor(direction.opposite()) != Some(note.id) => {
                        violations.push(LinkViolation::Asymmetric {
                            note_id: note.id,
                            direction,
                            target,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        let homes: Vec<NoteId> = notes
            .iter()
            .filter(|note| note.is_home)
            .map(|note| note.id)
            .collect();
        if homes.len() > 1 {
            violations.push(LinkViolation::MultipleHomes(homes));
        }

        if !violations.is_empty() {
            warn!(
                "event=link_audit module=links status=inconsistent notes={} violations={}",
                notes.len(),
                violations.len()
            );
        }
        Ok(violations)
    }

    async fn require_note(&self, note_id: NoteId) -> Result<Note, LinkServiceError> {
        self.store
            .get_note(note_id)
            .await?
            .ok_or(LinkServiceError::NoteNotFound(note_id))
    }
}
