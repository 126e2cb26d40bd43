//! Database access for memories-core
//!
//! Schema creation and the key/value settings table live in
//! `memories_common::db`; this module owns Memory persistence.

pub mod memories;

pub use memories::{MemoryStore, SqliteMemoryStore};
