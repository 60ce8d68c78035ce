//! SQLite storage layer: WAL pool with split reader/writer and the cursor store.

pub mod cursor;
pub mod pool;

pub use cursor::SqliteCursorStore;
pub use pool::{DatabasePool, default_database_url};
