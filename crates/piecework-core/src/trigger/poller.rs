//! Locked fetch / emit / persist cycle for polling triggers.
//!
//! Every operation on a cursor key runs under that key's mutex, from the
//! cursor read through the connector fetch, the hand-off to the flow-run
//! dispatcher and the compare-and-swap. Items are emitted before the cursor
//! is written: a crash in between re-delivers them on the next poll
//! (at-least-once), never loses them.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use piecework_types::engine::FailureReason;
use piecework_types::error::RepositoryError;
use piecework_types::job::FlowVersionSnapshot;
use piecework_types::poll::{DedupCursor, PollItem};
use piecework_types::trigger::DedupStrategy;

use super::dedup::{self, PollDecision, PollError};
use super::locks::KeyedLocks;
use super::ports::{FlowRunBatch, FlowRunDispatcher};
use crate::repository::CursorStore;

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Baseline,
    Advanced,
    Unchanged,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct PollReport {
    pub outcome: PollOutcome,
    /// Items handed to the flow-run dispatcher, oldest-first.
    pub emitted: Vec<PollItem>,
}

pub struct PollingEngine<C: CursorStore> {
    store: Arc<C>,
    locks: KeyedLocks,
}

impl<C: CursorStore> PollingEngine<C> {
    pub fn new(store: Arc<C>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    /// Poll once and emit the new items.
    ///
    /// `fetch` is not polled until the key's lock is held.
    pub async fn poll<F>(
        &self,
        flow: &FlowVersionSnapshot,
        strategy: &DedupStrategy,
        fetch: F,
        flow_runs: &dyn FlowRunDispatcher,
    ) -> Result<PollReport, PollError>
    where
        F: Future<Output = Result<Value, FailureReason>> + Send,
    {
        let key = flow.cursor_key();
        let _guard = self.locks.lock(&key).await;

        let stored = self.store.get(&key).await?;
        let raw = dedup::expect_items(fetch.await.map_err(PollError::Fetch)?)?;
        let decision = dedup::compute(
            strategy,
            stored.as_ref().map(|s| &s.cursor),
            &raw,
            Utc::now(),
        )?;
        let expected_version = stored.as_ref().map(|s| s.version);

        match decision {
            PollDecision::Baseline { cursor } => {
                self.swap(&key, expected_version, &cursor).await?;
                tracing::info!(cursor_key = %key, items = raw.len(), "cold start, baseline recorded");
                Ok(PollReport {
                    outcome: PollOutcome::Baseline,
                    emitted: Vec::new(),
                })
            }
            PollDecision::Unchanged => Ok(PollReport {
                outcome: PollOutcome::Unchanged,
                emitted: Vec::new(),
            }),
            PollDecision::RolledBack { newest_key } => {
                tracing::warn!(
                    cursor_key = %key,
                    newest_key = %newest_key,
                    "newest item is older than the cursor, discarding poll"
                );
                Ok(PollReport {
                    outcome: PollOutcome::RolledBack,
                    emitted: Vec::new(),
                })
            }
            PollDecision::Advance { new_items, cursor } => {
                if !new_items.is_empty() {
                    let payloads = new_items.iter().map(|item| item.data.clone()).collect();
                    flow_runs
                        .dispatch(&FlowRunBatch::for_flow(flow, payloads))
                        .await?;
                }
                self.swap(&key, expected_version, &cursor).await?;
                tracing::debug!(cursor_key = %key, emitted = new_items.len(), "cursor advanced");
                Ok(PollReport {
                    outcome: PollOutcome::Advanced,
                    emitted: new_items,
                })
            }
        }
    }

    /// Take the enable-time baseline, replacing any existing cursor.
    pub async fn baseline<F>(
        &self,
        flow: &FlowVersionSnapshot,
        strategy: &DedupStrategy,
        fetch: F,
    ) -> Result<DedupCursor, PollError>
    where
        F: Future<Output = Result<Value, FailureReason>> + Send,
    {
        let key = flow.cursor_key();
        let _guard = self.locks.lock(&key).await;

        let raw = dedup::expect_items(fetch.await.map_err(PollError::Fetch)?)?;
        let cursor = dedup::baseline(strategy, &raw, Utc::now())?;
        let existing = self.store.get(&key).await?;
        self.swap(&key, existing.map(|s| s.version), &cursor).await?;
        Ok(cursor)
    }

    /// Delete the cursor (trigger disabled).
    pub async fn reset(&self, flow: &FlowVersionSnapshot) -> Result<(), PollError> {
        let key = flow.cursor_key();
        {
            let _guard = self.locks.lock(&key).await;
            self.store.delete(&key).await?;
        }
        self.locks.release_idle(&key);
        Ok(())
    }

    async fn swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        cursor: &DedupCursor,
    ) -> Result<u64, PollError> {
        self.store
            .compare_and_swap(key, expected_version, cursor)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict(_) => PollError::Conflict(key.to_string()),
                other => PollError::Store(other),
            })
    }
}
