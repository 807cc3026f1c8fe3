//! Inline reference resolution.
//!
//! # Responsibility
//! - Find `[code]` tokens in document text (`scanner`).
//! - Resolve them against the entity store with per-session memoization
//!   (`cache`).
//! - Rewrite the document tree through the adapter contract (`document`,
//!   `pipeline`).

pub mod cache;
pub mod document;
pub mod pipeline;
pub mod scanner;
