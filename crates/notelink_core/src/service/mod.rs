//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate entity store calls into use-case level APIs.
//! - Keep multi-record invariants out of storage adapters.

pub mod link_service;
