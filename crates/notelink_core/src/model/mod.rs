//! Domain model for notes, tasks and references.
//!
//! # Responsibility
//! - Define canonical data structures used by link and reference logic.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID and a unique `RefCode`.
//! - Cross-entity relations are stored as ids, never as owned pointers.

pub mod note;
pub mod ref_code;
pub mod reference;
pub mod task;
