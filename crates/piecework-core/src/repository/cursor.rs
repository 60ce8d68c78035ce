//! Dedup cursor store port and its in-memory implementation.
//!
//! Keys are opaque strings derived from `(flow_id, trigger_name)` via
//! [`piecework_types::job::cursor_key`]. Writes are optimistic: every stored
//! cursor carries a version, and a write names the version it expects to
//! replace (`None` = the key must not exist yet).

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use piecework_types::error::RepositoryError;
use piecework_types::poll::{DedupCursor, VersionedCursor};

/// Persistent key-value storage for dedup cursors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// The SQLite implementation lives in piecework-infra.
pub trait CursorStore: Send + Sync {
    /// Read the cursor for `key`. Returns None if the trigger has no cursor.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<VersionedCursor>, RepositoryError>> + Send;

    /// Atomically replace the cursor if its version still equals `expected_version`.
    ///
    /// Returns the new version. A mismatch is `RepositoryError::Conflict`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete the cursor. No-op if the key does not exist.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// DashMap-backed cursor store for tests and ephemeral workers.
#[derive(Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<String, VersionedCursor>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

impl CursorStore for InMemoryCursorStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedCursor>, RepositoryError> {
        Ok(self.cursors.get(key).map(|entry| entry.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> Result<u64, RepositoryError> {
        match self.cursors.entry(key.to_string()) {
            Entry::Vacant(slot) => match expected_version {
                None => {
                    slot.insert(VersionedCursor {
                        cursor: cursor.clone(),
                        version: 1,
                    });
                    Ok(1)
                }
                Some(expected) => Err(RepositoryError::Conflict(format!(
                    "{key}: expected version {expected}, cursor was deleted"
                ))),
            },
            Entry::Occupied(mut slot) => {
                let current = slot.get().version;
                if expected_version != Some(current) {
                    return Err(RepositoryError::Conflict(format!(
                        "{key}: expected version {expected_version:?}, found {current}"
                    )));
                }
                let next = current + 1;
                slot.insert(VersionedCursor {
                    cursor: cursor.clone(),
                    version: next,
                });
                Ok(next)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.cursors.remove(key);
        Ok(())
    }
}
