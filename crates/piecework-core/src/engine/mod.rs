//! Isolation strategies: how a single connector call is executed.
//!
//! - `strategy` -- the `IsolationStrategy` port
//! - `invoke` -- call routing shared by every strategy and the sandbox child
//! - `thread` -- in-process strategy (tokio task + cooperative timeout)

pub mod invoke;
pub mod strategy;
pub mod thread;

pub use invoke::invoke_connector;
pub use strategy::IsolationStrategy;
pub use thread::ThreadStrategy;
