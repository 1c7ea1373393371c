//! Data Transfer Objects for archive communication
//!
//! This module contains the request and response bodies exchanged with
//! the archive's REST API. DTOs are lightweight shapes optimized for
//! network transfer; the domain entities stay in `domain`.

pub mod claim;
