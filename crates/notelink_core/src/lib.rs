//! Core domain logic for NoteLink.
//! This crate is the single source of truth for note adjacency and inline
//! reference invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod reference;
pub mod service;
pub mod store;

pub use config::{ConfigError, CoreConfig, ResolverConfig};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::note::{Adjacency, Direction, NewNote, Note, NoteFormat, NoteId, NotePatch};
pub use model::ref_code::{InvalidRefCode, RefCode};
pub use model::reference::{ReferenceKind, ReferenceTarget, ResolvedReference};
pub use model::task::{NewTask, Task, TaskId, TaskStatus};
pub use reference::cache::{ReferenceCache, Resolution};
pub use reference::document::{
    Block, DocumentAdapter, DocumentError, DocumentId, DocumentTree, Inline, LeafEditor, LeafRef,
    NavigationHook, OpenMode, ReferenceNode,
};
pub use reference::pipeline::{PipelineState, ResolutionSession, SessionStats};
pub use reference::scanner::{find_code_spans, scan_codes};
pub use service::link_service::{LinkService, LinkServiceError, LinkViolation};
pub use store::{EntityStore, MemoryEntityStore, SqliteEntityStore, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
