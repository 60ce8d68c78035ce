//! Connector contract and registry.
//!
//! - `piece` -- the `Connector` trait implemented by every piece
//! - `box_connector` -- `BoxConnector` for dynamic dispatch
//! - `registry` -- semver-aware lookup of installed pieces

pub mod box_connector;
pub mod piece;
pub mod registry;

pub use box_connector::BoxConnector;
pub use piece::Connector;
pub use registry::ConnectorRegistry;
