//! Document tree adapter contract and an in-memory tree.
//!
//! # Responsibility
//! - Define what the resolution pipeline needs from an editor's document:
//!   flattened text, change notifications, and leaf rewrites inside one
//!   visible update.
//! - Provide `DocumentTree`, a paragraph/inline tree implementing the
//!   contract for hosts without their own editor model and for tests.
//!
//! # Invariants
//! - A `transact` call commits all of its leaf replacements or none.
//! - Rewrites made through `transact` do not fire change listeners.
//! - Reference nodes carry no text leaves, so their content is never scanned.

use crate::model::ref_code::RefCode;
use crate::model::reference::{ReferenceKind, ResolvedReference};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// How a navigation target should be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Replace the current view.
    Replace,
    /// Open next to the current view.
    Alongside,
}

impl OpenMode {
    /// Maps the activation modifier (e.g. ctrl/cmd held) to a mode.
    pub fn from_modifier(modifier: bool) -> Self {
        if modifier {
            Self::Alongside
        } else {
            Self::Replace
        }
    }
}

/// Application-supplied navigation callback.
pub type NavigationHook = Arc<dyn Fn(&RefCode, ReferenceKind, OpenMode) + Send + Sync>;

/// Inline badge replacing a bracketed code once it resolves.
#[derive(Clone)]
pub struct ReferenceNode {
    reference: ResolvedReference,
    navigate: NavigationHook,
}

impl ReferenceNode {
    pub fn new(reference: ResolvedReference, navigate: NavigationHook) -> Self {
        Self {
            reference,
            navigate,
        }
    }

    pub fn code(&self) -> &RefCode {
        &self.reference.code
    }

    pub fn kind(&self) -> ReferenceKind {
        self.reference.kind()
    }

    pub fn title(&self) -> &str {
        &self.reference.title
    }

    pub fn reference(&self) -> &ResolvedReference {
        &self.reference
    }

    /// Invokes the navigation hook with this node's code and kind.
    pub fn activate(&self, modifier: bool) {
        (self.navigate)(
            &self.reference.code,
            self.reference.kind(),
            OpenMode::from_modifier(modifier),
        );
    }
}

impl PartialEq for ReferenceNode {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Debug for ReferenceNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceNode")
            .field("code", &self.reference.code)
            .field("kind", &self.reference.kind())
            .field("title", &self.reference.title)
            .finish()
    }
}

/// Inline content of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    Reference(ReferenceNode),
}

/// Position of one inline leaf: block index, then inline index.
///
/// Replacing a leaf shifts the inline indices after it in the same block, so
/// editors should replace leaves in descending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeafRef {
    pub block: usize,
    pub inline: usize,
}

/// Identity of the document currently loaded in an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while rewriting leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// Leaf position does not exist in the current tree.
    StaleLeaf(LeafRef),
    /// Leaf exists but is not a text leaf.
    NotTextLeaf(LeafRef),
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleLeaf(leaf) => {
                write!(f, "leaf {}:{} no longer exists", leaf.block, leaf.inline)
            }
            Self::NotTextLeaf(leaf) => {
                write!(f, "leaf {}:{} is not a text leaf", leaf.block, leaf.inline)
            }
        }
    }
}

impl Error for DocumentError {}

pub type ChangeListener = Box<dyn Fn() + Send + Sync>;

/// Handle returned by `on_change`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Leaf-level access granted inside one `transact` scope.
pub trait LeafEditor {
    fn document_id(&self) -> DocumentId;
    /// Plain text leaves, excluding anything inside reference nodes.
    fn text_leaves(&self) -> Vec<(LeafRef, String)>;
    /// Replaces one text leaf with the given pieces.
    fn replace_leaf(&mut self, leaf: LeafRef, pieces: Vec<Inline>) -> Result<(), DocumentError>;
}

/// Document tree contract consumed by the resolution pipeline.
pub trait DocumentAdapter: Send + Sync {
    fn document_id(&self) -> DocumentId;
    fn flattened_text(&self) -> String;
    fn on_change(&self, listener: ChangeListener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
    /// Runs `edit` against the live tree as one visible update; nothing is
    /// committed when `edit` fails.
    fn transact(
        &self,
        edit: &mut dyn FnMut(&mut dyn LeafEditor) -> Result<(), DocumentError>,
    ) -> Result<(), DocumentError>;
}

/// One paragraph of inline content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub inlines: Vec<Inline>,
}

impl Block {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        let inlines = if value.is_empty() {
            Vec::new()
        } else {
            vec![Inline::Text(value)]
        };
        Self { inlines }
    }

    fn flatten_into(&self, out: &mut String) {
        for inline in &self.inlines {
            match inline {
                Inline::Text(text) => out.push_str(text),
                Inline::Reference(node) => out.push_str(&node.code().bracketed()),
            }
        }
    }
}

struct TreeState {
    id: DocumentId,
    blocks: Vec<Block>,
}

struct TreeDraft {
    id: DocumentId,
    blocks: Vec<Block>,
}

impl LeafEditor for TreeDraft {
    fn document_id(&self) -> DocumentId {
        self.id
    }

    fn text_leaves(&self) -> Vec<(LeafRef, String)> {
        let mut leaves = Vec::new();
        for (block_index, block) in self.blocks.iter().enumerate() {
            for (inline_index, inline) in block.inlines.iter().enumerate() {
                if let Inline::Text(text) = inline {
                    leaves.push((
                        LeafRef {
                            block: block_index,
                            inline: inline_index,
                        },
                        text.clone(),
                    ));
                }
            }
        }
        leaves
    }

    fn replace_leaf(&mut self, leaf: LeafRef, pieces: Vec<Inline>) -> Result<(), DocumentError> {
        let block = self
            .blocks
            .get_mut(leaf.block)
            .ok_or(DocumentError::StaleLeaf(leaf))?;
        match block.inlines.get(leaf.inline) {
            Some(Inline::Text(_)) => {}
            Some(Inline::Reference(_)) => return Err(DocumentError::NotTextLeaf(leaf)),
            None => return Err(DocumentError::StaleLeaf(leaf)),
        }
        let pieces = pieces
            .into_iter()
            .filter(|piece| !matches!(piece, Inline::Text(text) if text.is_empty()));
        block.inlines.splice(leaf.inline..=leaf.inline, pieces);
        Ok(())
    }
}

/// In-memory paragraph tree implementing `DocumentAdapter`.
pub struct DocumentTree {
    state: Mutex<TreeState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn Fn() + Send + Sync>)>>,
    next_listener: AtomicU64,
}

impl DocumentTree {
    pub fn new() -> Self {
        Self::from_blocks(Vec::new())
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            state: Mutex::new(TreeState {
                id: DocumentId::new(),
                blocks,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// One text block per paragraph.
    pub fn from_paragraphs<T: AsRef<str>>(paragraphs: &[T]) -> Self {
        Self::from_blocks(
            paragraphs
                .iter()
                .map(|text| Block::text(text.as_ref()))
                .collect(),
        )
    }

    /// Snapshot of the current blocks.
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    /// Swaps in a different document; returns its new identity.
    pub fn load(&self, blocks: Vec<Block>) -> DocumentId {
        let id = {
            let mut state = self.state.lock();
            state.id = DocumentId::new();
            state.blocks = blocks;
            state.id
        };
        self.fire_change();
        id
    }

    /// User edit: replaces one paragraph with plain text.
    pub fn set_paragraph(&self, block: usize, text: impl Into<String>) {
        {
            let mut state = self.state.lock();
            let new_block = Block::text(text);
            if block < state.blocks.len() {
                state.blocks[block] = new_block;
            } else {
                state.blocks.push(new_block);
            }
        }
        self.fire_change();
    }

    /// User edit: types text at the end of one paragraph.
    pub fn append_text(&self, block: usize, text: &str) {
        {
            let mut state = self.state.lock();
            if block >= state.blocks.len() {
                state.blocks.push(Block::default());
            }
            let index = block.min(state.blocks.len() - 1);
            let inlines = &mut state.blocks[index].inlines;
            match inlines.last_mut() {
                Some(Inline::Text(last)) => last.push_str(text),
                _ => inlines.push(Inline::Text(text.to_string())),
            }
        }
        self.fire_change();
    }

    fn fire_change(&self) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentAdapter for DocumentTree {
    fn document_id(&self) -> DocumentId {
        self.state.lock().id
    }

    fn flattened_text(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        for (index, block) in state.blocks.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            block.flatten_into(&mut out);
        }
        out
    }

    fn on_change(&self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::from(listener)));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn transact(
        &self,
        edit: &mut dyn FnMut(&mut dyn LeafEditor) -> Result<(), DocumentError>,
    ) -> Result<(), DocumentError> {
        let mut state = self.state.lock();
        let mut draft = TreeDraft {
            id: state.id,
            blocks: state.blocks.clone(),
        };
        edit(&mut draft)?;
        state.blocks = draft.blocks;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Block, DocumentAdapter, DocumentError, DocumentTree, Inline, LeafEditor, LeafRef,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn flattened_text_joins_blocks_with_newlines() {
        let tree = DocumentTree::from_paragraphs(&["one", "two"]);
        assert_eq!(tree.flattened_text(), "one\ntwo");
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let tree = DocumentTree::from_paragraphs(&["alpha", "beta"]);
        let result = tree.transact(&mut |editor: &mut dyn LeafEditor| {
            editor.replace_leaf(
                LeafRef { block: 0, inline: 0 },
                vec![Inline::Text("changed".to_string())],
            )?;
            editor.replace_leaf(LeafRef { block: 9, inline: 0 }, Vec::new())
        });
        assert_eq!(
            result,
            Err(DocumentError::StaleLeaf(LeafRef { block: 9, inline: 0 }))
        );
        assert_eq!(tree.blocks()[0], Block::text("alpha"));
    }

    #[test]
    fn user_edits_fire_listeners_but_transactions_do_not() {
        let tree = DocumentTree::from_paragraphs(&["x"]);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = tree.on_change(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tree.append_text(0, "y");
        tree.transact(&mut |_: &mut dyn LeafEditor| Ok(()))
            .expect("empty transaction");
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tree.remove_listener(id);
        tree.append_text(0, "z");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(tree.flattened_text(), "xyz");
    }

    #[test]
    fn load_assigns_a_new_document_identity() {
        let tree = DocumentTree::from_paragraphs(&["a"]);
        let before = tree.document_id();
        let after = tree.load(vec![Block::text("b")]);
        assert_ne!(before, after);
        assert_eq!(tree.document_id(), after);
    }
}
