//! Job intake: dispatcher, worker pool and the result-reporting port.

pub mod dispatcher;
pub mod pool;
pub mod reporter;

pub use dispatcher::JobDispatcher;
pub use pool::{PoolSettings, WorkerPool};
pub use reporter::ResultReporter;
