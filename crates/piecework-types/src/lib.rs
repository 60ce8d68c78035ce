//! Shared domain types for piecework.
//!
//! This crate contains the types exchanged between the job dispatcher, the
//! isolation strategies, the trigger hook protocol and the sandbox child:
//! execution modes, job requests, hook and handshake definitions, poll items,
//! dedup cursors and engine results.
//!
//! Zero infrastructure dependencies -- only serde, chrono, uuid, semver, thiserror.

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod piece;
pub mod poll;
pub mod trigger;
