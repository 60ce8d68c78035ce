//! Storage traits (ports).
//!
//! The dedup cursor store is the only shared mutable state of the trigger
//! engine. piecework-infra provides the SQLite implementation; the core
//! crate never depends on a specific storage technology.

pub mod cursor;

pub use cursor::{CursorStore, InMemoryCursorStore};
