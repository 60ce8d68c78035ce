//! Trigger engine and job dispatch for piecework.
//!
//! This crate defines the ports (connector contract, isolation strategy,
//! cursor store, reporting collaborators) that piecework-infra implements,
//! plus the logic that sits between them. It depends only on
//! `piecework-types` and tokio -- never on `piecework-infra` or any database,
//! process or HTTP crate.

pub mod connector;
pub mod engine;
pub mod job;
pub mod repository;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;
