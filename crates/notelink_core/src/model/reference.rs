//! Resolved reference model.
//!
//! # Responsibility
//! - Describe what a bracketed code resolved to, for rendering and navigation.
//!
//! # Invariants
//! - `ReferenceTarget` is a closed set; renderers match it exhaustively.
//! - `ResolvedReference::kind()` is always derived from `target`.

use crate::model::note::{Note, NoteFormat, NoteId};
use crate::model::ref_code::RefCode;
use crate::model::task::{Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Entity collection a code resolved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Note,
    Task,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
        }
    }
}

/// Kind-specific payload carried alongside a resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceTarget {
    Note {
        note_id: NoteId,
        format: NoteFormat,
        starred: bool,
    },
    Task {
        task_id: TaskId,
        status: TaskStatus,
    },
}

/// Successful resolution of one reference code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub code: RefCode,
    /// Display title: note title or task text.
    pub title: String,
    pub target: ReferenceTarget,
}

impl ResolvedReference {
    pub fn kind(&self) -> ReferenceKind {
        match self.target {
            ReferenceTarget::Note { .. } => ReferenceKind::Note,
            ReferenceTarget::Task { .. } => ReferenceKind::Task,
        }
    }

    pub fn from_note(note: &Note) -> Self {
        Self {
            code: note.ref_code.clone(),
            title: note.title.clone(),
            target: ReferenceTarget::Note {
                note_id: note.id,
                format: note.format,
                starred: note.is_starred,
            },
        }
    }

    pub fn from_task(task: &Task) -> Self {
        Self {
            code: task.ref_code.clone(),
            title: task.text.clone(),
            target: ReferenceTarget::Task {
                task_id: task.id,
                status: task.status,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReferenceKind, ReferenceTarget, ResolvedReference};
    use crate::model::note::{Note, NoteFormat};
    use crate::model::ref_code::RefCode;
    use crate::model::task::{NewTask, Task, TaskStatus};

    #[test]
    fn kind_follows_target_variant() {
        let mut note = Note::new("Sketch", RefCode::parse("d1agrm").expect("valid code"));
        note.format = NoteFormat::Diagram;
        let resolved = ResolvedReference::from_note(&note);
        assert_eq!(resolved.kind(), ReferenceKind::Note);
        assert!(matches!(
            resolved.target,
            ReferenceTarget::Note {
                format: NoteFormat::Diagram,
                ..
            }
        ));

        let task = Task::from_new(
            NewTask::with_text("Ship it").with_status(TaskStatus::Done),
            RefCode::parse("t2aaaa").expect("valid code"),
            0,
        );
        let resolved = ResolvedReference::from_task(&task);
        assert_eq!(resolved.kind(), ReferenceKind::Task);
        assert_eq!(resolved.title, "Ship it");
    }
}
