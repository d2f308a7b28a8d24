//! Generated-query safety gate.
//!
//! The AI generates read queries from natural language; this module bounds
//! their blast radius before they touch the record store. Validation rejects
//! anything that is not a single read-only, user-scoped SELECT, and
//! execution distinguishes "rejected by policy" from "failed to run" so
//! callers can message users differently for each.

mod safety;
mod service;

pub use safety::{validate, FORBIDDEN_KEYWORDS};
pub use service::{QueryError, QueryService, DEFAULT_MAX_ROWS};
