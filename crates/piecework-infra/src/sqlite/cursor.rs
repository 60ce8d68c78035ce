//! SQLite dedup cursor store.
//!
//! Implements `CursorStore` from `piecework-core`. Cursors are stored as JSON
//! text next to a version column; writes are conditional on that version so a
//! concurrent writer (another worker process) surfaces as a conflict instead
//! of a lost update.

use chrono::Utc;
use sqlx::Row;

use piecework_core::repository::CursorStore;
use piecework_types::error::RepositoryError;
use piecework_types::poll::{DedupCursor, VersionedCursor};

use super::pool::DatabasePool;

pub struct SqliteCursorStore {
    pool: DatabasePool,
}

impl SqliteCursorStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

impl CursorStore for SqliteCursorStore {
    async fn get(&self, key: &str) -> Result<Option<VersionedCursor>, RepositoryError> {
        let row = sqlx::query("SELECT cursor, version FROM trigger_cursors WHERE cursor_key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("cursor").map_err(query_err)?;
        let version: i64 = row.try_get("version").map_err(query_err)?;
        let cursor: DedupCursor = serde_json::from_str(&raw)
            .map_err(|e| RepositoryError::Query(format!("invalid cursor JSON: {e}")))?;

        Ok(Some(VersionedCursor {
            cursor,
            version: version as u64,
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> Result<u64, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let raw = serde_json::to_string(cursor)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize cursor: {e}")))?;

        match expected_version {
            None => {
                let result = sqlx::query(
                    r#"INSERT INTO trigger_cursors (cursor_key, cursor, version, created_at, updated_at)
                       VALUES (?, ?, 1, ?, ?)
                       ON CONFLICT (cursor_key) DO NOTHING"#,
                )
                .bind(key)
                .bind(&raw)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool.writer)
                .await
                .map_err(query_err)?;

                if result.rows_affected() == 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "{key}: cursor already exists"
                    )));
                }
                Ok(1)
            }
            Some(expected) => {
                let result = sqlx::query(
                    r#"UPDATE trigger_cursors
                       SET cursor = ?, version = version + 1, updated_at = ?
                       WHERE cursor_key = ? AND version = ?"#,
                )
                .bind(&raw)
                .bind(&now)
                .bind(key)
                .bind(expected as i64)
                .execute(&self.pool.writer)
                .await
                .map_err(query_err)?;

                if result.rows_affected() == 0 {
                    return Err(RepositoryError::Conflict(format!(
                        "{key}: expected version {expected}"
                    )));
                }
                Ok(expected + 1)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM trigger_cursors WHERE cursor_key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}
