//! Core domain types
//!
//! The fundamental entities of the automation engine, shared between the
//! launcher (orchestration) and the archive client (persistence). The
//! archive is the single source of truth for task state; these types are
//! the in-memory view of its records.

pub mod context;
pub mod spec;
pub mod status;
pub mod task;
