//! SQLite persistence for Lifelog.
//!
//! Implements the core's storage collaborator interfaces over a single
//! embedded database: conversation contexts and the bounded turn window,
//! generic domain-record CRUD for extensions, and the read-query primitive
//! consumed by the query safety gate.

pub mod error;
mod store;

pub use error::{Error, Result};
pub use store::SqliteStore;
