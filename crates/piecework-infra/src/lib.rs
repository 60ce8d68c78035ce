//! Infrastructure layer for piecework.
//!
//! Contains the implementations of the ports defined in `piecework-core`:
//! SQLite cursor storage, the subprocess sandbox, the control-plane API
//! client, the built-in pieces and the worker configuration loader.

pub mod api_client;
pub mod config;
pub mod pieces;
pub mod runner;
pub mod sandbox;
pub mod sqlite;
