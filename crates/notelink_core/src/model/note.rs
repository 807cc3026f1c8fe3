//! Note domain model and four-direction adjacency.
//!
//! # Responsibility
//! - Define the canonical note record consumed by link and reference logic.
//! - Name the four adjacency directions and their pairing.
//!
//! # Invariants
//! - Adjacency holds note ids only, resolved against a store; never pointers.
//! - A freshly constructed note has no neighbors and is not home.
//! - Adjacency fields are written only through `LinkService`.

use crate::model::ref_code::RefCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable note identifier.
pub type NoteId = Uuid;

/// One of the four adjacency directions on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All directions in storage column order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Paired direction: up<->down, left<->right.
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Four optional neighbor ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjacency {
    pub up: Option<NoteId>,
    pub down: Option<NoteId>,
    pub left: Option<NoteId>,
    pub right: Option<NoteId>,
}

impl Adjacency {
    pub fn get(&self, direction: Direction) -> Option<NoteId> {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn set(&mut self, direction: Direction, value: Option<NoteId>) {
        let slot = match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
        };
        *slot = value;
    }

    /// Directions whose field currently equals `target`.
    pub fn directions_to(&self, target: NoteId) -> Vec<Direction> {
        Direction::ALL
            .into_iter()
            .filter(|direction| self.get(*direction) == Some(target))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        Direction::ALL
            .into_iter()
            .all(|direction| self.get(direction).is_none())
    }
}

/// Rendering sub-kind of a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteFormat {
    /// Rich text document.
    #[default]
    Document,
    /// Note whose content is a diagram/canvas.
    Diagram,
}

/// Canonical note record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    /// Serialized document tree; opaque to this crate.
    pub content: String,
    pub format: NoteFormat,
    pub links: Adjacency,
    pub is_home: bool,
    pub is_starred: bool,
    pub ref_code: RefCode,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl Note {
    /// Builds a detached note with no neighbors.
    pub fn new(title: impl Into<String>, ref_code: RefCode) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: String::new(),
            format: NoteFormat::Document,
            links: Adjacency::default(),
            is_home: false,
            is_starred: false,
            ref_code,
            updated_at: 0,
        }
    }

    /// Materializes a creation request into a detached record.
    pub fn from_new(request: NewNote, ref_code: RefCode, updated_at: i64) -> Self {
        Self {
            title: request.title,
            content: request.content,
            format: request.format,
            is_starred: request.is_starred,
            updated_at,
            ..Self::new(String::new(), ref_code)
        }
    }

    pub fn neighbor(&self, direction: Direction) -> Option<NoteId> {
        self.links.get(direction)
    }
}

/// Creation request for a note. Adjacency and home flag are never accepted
/// here so new notes always start detached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub format: NoteFormat,
    pub is_starred: bool,
    /// Explicit code for imports; a fresh one is generated when `None`.
    pub ref_code: Option<RefCode>,
}

impl NewNote {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_ref_code(mut self, code: RefCode) -> Self {
        self.ref_code = Some(code);
        self
    }

    pub fn with_format(mut self, format: NoteFormat) -> Self {
        self.format = format;
        self
    }
}

/// Partial field update for one note.
///
/// `None` leaves a field untouched. For adjacency, `Some(None)` clears the
/// field and `Some(Some(id))` points it at `id`.
///
/// Outside this crate a patch can only carry title and star edits. Adjacency
/// and home writes are built by `LinkService`, which keeps both sides of a
/// link and the single home in step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub(crate) title: Option<String>,
    pub(crate) up: Option<Option<NoteId>>,
    pub(crate) down: Option<Option<NoteId>>,
    pub(crate) left: Option<Option<NoteId>>,
    pub(crate) right: Option<Option<NoteId>>,
    pub(crate) is_home: Option<bool>,
    pub(crate) is_starred: Option<bool>,
}

impl NotePatch {
    pub fn retitle(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn starred(value: bool) -> Self {
        Self {
            is_starred: Some(value),
            ..Self::default()
        }
    }

    /// Patch writing exactly one adjacency field.
    pub(crate) fn link(direction: Direction, value: Option<NoteId>) -> Self {
        Self::default().with_link(direction, value)
    }

    /// Adds one adjacency write to this patch.
    pub(crate) fn with_link(mut self, direction: Direction, value: Option<NoteId>) -> Self {
        let slot = match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
        };
        *slot = Some(value);
        self
    }

    pub(crate) fn home(value: bool) -> Self {
        Self {
            is_home: Some(value),
            ..Self::default()
        }
    }

    /// Applies this patch to an in-memory record.
    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        for direction in Direction::ALL {
            if let Some(value) = self.link_value(direction) {
                note.links.set(direction, value);
            }
        }
        if let Some(value) = self.is_home {
            note.is_home = value;
        }
        if let Some(value) = self.is_starred {
            note.is_starred = value;
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn link_value(&self, direction: Direction) -> Option<Option<NoteId>> {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn is_home(&self) -> Option<bool> {
        self.is_home
    }

    pub fn is_starred(&self) -> Option<bool> {
        self.is_starred
    }

    /// Whether this patch writes adjacency or the home flag.
    pub fn touches_links(&self) -> bool {
        self.is_home.is_some()
            || Direction::ALL
                .into_iter()
                .any(|direction| self.link_value(direction).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::{Adjacency, Direction, Note, NotePatch};
    use crate::model::ref_code::RefCode;
    use uuid::Uuid;

    #[test]
    fn opposite_is_an_involution() {
        for direction in Direction::ALL {
            assert_ne!(direction, direction.opposite());
            assert_eq!(direction, direction.opposite().opposite());
        }
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut note = Note::new("n", RefCode::generate());
        let other = Uuid::new_v4();
        note.links.down = Some(other);

        NotePatch::link(Direction::Up, Some(other)).apply_to(&mut note);
        assert_eq!(note.links.up, Some(other));
        assert_eq!(note.links.down, Some(other));

        NotePatch::link(Direction::Down, None).apply_to(&mut note);
        assert_eq!(note.links.down, None);
        assert_eq!(note.links.up, Some(other));
    }

    #[test]
    fn public_constructors_never_write_links_or_home() {
        let mut note = Note::new("old", RefCode::generate());
        let partner = Uuid::new_v4();
        note.links.left = Some(partner);
        note.is_home = true;

        let retitle = NotePatch::retitle("new");
        let star = NotePatch::starred(true);
        assert!(!retitle.touches_links());
        assert!(!star.touches_links());
        assert!(!NotePatch::default().touches_links());
        assert_eq!(retitle.title(), Some("new"));
        assert_eq!(star.is_starred(), Some(true));

        retitle.apply_to(&mut note);
        star.apply_to(&mut note);
        assert_eq!(note.title, "new");
        assert!(note.is_starred);
        assert_eq!(note.links.left, Some(partner));
        assert!(note.is_home);

        assert!(NotePatch::link(Direction::Left, None).touches_links());
        assert!(NotePatch::home(false).touches_links());
    }

    #[test]
    fn directions_to_lists_every_matching_field() {
        let target = Uuid::new_v4();
        let links = Adjacency {
            up: Some(target),
            left: Some(target),
            ..Adjacency::default()
        };
        assert_eq!(
            links.directions_to(target),
            vec![Direction::Up, Direction::Left]
        );
        assert!(!links.is_empty());
        assert!(Adjacency::default().is_empty());
    }
}
