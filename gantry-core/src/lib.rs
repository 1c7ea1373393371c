//! Gantry Core
//!
//! Core types for the gantry automation engine.
//!
//! This crate contains:
//! - Domain types: the entities the engine orchestrates (DataContext, Task, JobSpec)
//! - DTOs: wire payloads exchanged with the archive

pub mod domain;
pub mod dto;
