//! Dedup decisions for polling triggers.
//!
//! Pure functions: given the items a connector returned and the stored
//! cursor, decide which items are new and what the next cursor is. No I/O;
//! the locked fetch/emit/persist cycle lives in [`super::poller`].
//!
//! The source's order is trusted. Items arrive newest-first; the configured
//! [`OrderDirection`] only says what "older" means for the ordering key
//! (`Descending`: smaller is older, `Ascending`: larger is older).
//!
//! Known limitations:
//! - Rollback detection only compares the newest fetched item with the
//!   cursor. Several deletions that leave an older item on top look like an
//!   ordinary "nothing new" poll.
//! - `TimeBased` emits items strictly newer than the stored timestamp. An
//!   item that shows up later carrying the same millisecond as the cursor is
//!   never emitted.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use piecework_types::engine::{FailureReason, json_type_name};
use piecework_types::error::{DispatchError, RepositoryError};
use piecework_types::poll::{DedupCursor, PollItem};
use piecework_types::trigger::{DedupStrategy, OrderDirection};

/// Separates the ordering-key portion of an item id from its content hash.
pub const ID_SEPARATOR: char = '|';

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("poll output must be an array, got {0}")]
    NotAList(&'static str),

    #[error("item {index} has no ordering field '{field}'")]
    MissingOrderKey { field: String, index: usize },

    #[error("item {index} field '{field}' is not a timestamp")]
    InvalidTimestamp { field: String, index: usize },

    #[error("fetch failed: {0}")]
    Fetch(FailureReason),

    #[error("cursor store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("cursor '{0}' was modified concurrently")]
    Conflict(String),

    #[error("flow run dispatch failed: {0}")]
    Emit(#[from] DispatchError),
}

impl From<PollError> for FailureReason {
    fn from(err: PollError) -> Self {
        match err {
            PollError::NotAList(actual) => FailureReason::InvalidOutputShape {
                expected: "array".to_string(),
                actual: actual.to_string(),
            },
            PollError::MissingOrderKey { field, index }
            | PollError::InvalidTimestamp { field, index } => FailureReason::InvalidOutputShape {
                expected: format!("items with a valid '{field}' field"),
                actual: format!("item {index} without it"),
            },
            PollError::Fetch(reason) => reason,
            PollError::Conflict(key) => FailureReason::CursorConflict { key },
            PollError::Store(e) => FailureReason::host(format!("cursor store: {e}")),
            PollError::Emit(e) => FailureReason::host(format!("flow run dispatch: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Outcome of comparing one fetch against the stored cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    /// No cursor existed: record the newest item, emit nothing.
    Baseline { cursor: DedupCursor },
    /// New items, oldest-first, and the cursor to persist after emitting them.
    Advance {
        new_items: Vec<PollItem>,
        cursor: DedupCursor,
    },
    /// Nothing new. The cursor stays as it is.
    Unchanged,
    /// The newest fetched item is older than the cursor. Discard the poll.
    RolledBack { newest_key: Value },
}

/// Compare a fetch against the stored cursor.
pub fn compute(
    strategy: &DedupStrategy,
    cursor: Option<&DedupCursor>,
    raw: &[Value],
    now: DateTime<Utc>,
) -> Result<PollDecision, PollError> {
    let Some(cursor) = cursor else {
        return Ok(PollDecision::Baseline {
            cursor: baseline(strategy, raw, now)?,
        });
    };

    match strategy {
        DedupStrategy::LastItem {
            order_by,
            direction,
            max_items,
        } => {
            let items = keyed_items(raw, order_by, now)?;
            last_item(items, cursor, *direction, *max_items, now)
        }
        DedupStrategy::TimeBased {
            timestamp_field,
            max_items,
        } => {
            let items = timed_items(raw, timestamp_field, now)?;
            time_based(items, cursor, *max_items, now)
        }
    }
}

/// Cursor for a cold start: points at the newest item, or empty for an empty source.
pub fn baseline(
    strategy: &DedupStrategy,
    raw: &[Value],
    now: DateTime<Utc>,
) -> Result<DedupCursor, PollError> {
    let newest = match strategy {
        DedupStrategy::LastItem { order_by, .. } => keyed_items(raw, order_by, now)?.into_iter().next(),
        DedupStrategy::TimeBased {
            timestamp_field, ..
        } => newest_by_time(timed_items(raw, timestamp_field, now)?),
    };
    Ok(newest.map_or_else(|| DedupCursor::empty(now), |item| item.cursor(now)))
}

fn last_item(
    items: Vec<KeyedItem>,
    cursor: &DedupCursor,
    direction: OrderDirection,
    max_items: Option<usize>,
    now: DateTime<Utc>,
) -> Result<PollDecision, PollError> {
    let Some(newest) = items.first() else {
        return Ok(PollDecision::Unchanged);
    };

    if let Some(last_key) = cursor.last_order_key.as_ref() {
        if is_older(&newest.key, last_key, direction) {
            return Ok(PollDecision::RolledBack {
                newest_key: newest.key.clone(),
            });
        }
    }

    let next_cursor = newest.cursor(now);
    let mut fresh = Vec::new();
    for item in &items {
        if cursor.last_item_id.as_deref() == Some(item.item.id.as_str()) {
            break;
        }
        if let Some(last_key) = cursor.last_order_key.as_ref() {
            if is_older(&item.key, last_key, direction) {
                break;
            }
        }
        fresh.push(item.item.clone());
    }

    if fresh.is_empty() {
        return Ok(PollDecision::Unchanged);
    }
    if let Some(max) = max_items {
        fresh.truncate(max);
    }
    fresh.reverse();

    Ok(PollDecision::Advance {
        new_items: fresh,
        cursor: next_cursor,
    })
}

fn time_based(
    items: Vec<KeyedItem>,
    cursor: &DedupCursor,
    max_items: Option<usize>,
    now: DateTime<Utc>,
) -> Result<PollDecision, PollError> {
    let last = cursor.last_order_key.as_ref().and_then(Value::as_i64);

    let Some(newest) = newest_by_time(items.clone()) else {
        return Ok(PollDecision::Unchanged);
    };
    let newest_millis = newest.key.as_i64().unwrap_or(i64::MIN);
    if let Some(last) = last {
        if newest_millis < last {
            return Ok(PollDecision::RolledBack {
                newest_key: newest.key,
            });
        }
    }

    let mut fresh: Vec<KeyedItem> = items
        .into_iter()
        .filter(|item| match last {
            Some(last) => item.key.as_i64().is_some_and(|millis| millis > last),
            None => true,
        })
        .collect();
    if fresh.is_empty() {
        return Ok(PollDecision::Unchanged);
    }

    // Stable sort keeps the source's relative order for equal timestamps.
    fresh.sort_by_key(|item| item.key.as_i64().unwrap_or(i64::MIN));
    if let Some(max) = max_items {
        let skip = fresh.len().saturating_sub(max);
        fresh.drain(..skip);
    }

    Ok(PollDecision::Advance {
        new_items: fresh.into_iter().map(|item| item.item).collect(),
        cursor: newest.cursor(now),
    })
}

// ---------------------------------------------------------------------------
// Items and keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct KeyedItem {
    key: Value,
    item: PollItem,
}

impl KeyedItem {
    fn new(key: Value, data: &Value, now: DateTime<Utc>) -> Self {
        Self {
            item: PollItem {
                id: item_id(&key, data),
                data: data.clone(),
                observed_at: now,
            },
            key,
        }
    }

    fn cursor(&self, now: DateTime<Utc>) -> DedupCursor {
        DedupCursor {
            last_item_id: Some(self.item.id.clone()),
            last_order_key: Some(self.key.clone()),
            last_observed_at: now,
        }
    }
}

fn keyed_items(
    raw: &[Value],
    order_by: &str,
    now: DateTime<Utc>,
) -> Result<Vec<KeyedItem>, PollError> {
    raw.iter()
        .enumerate()
        .map(|(index, data)| {
            let key = lookup(data, order_by)
                .filter(|value| !value.is_null())
                .ok_or_else(|| PollError::MissingOrderKey {
                    field: order_by.to_string(),
                    index,
                })?;
            Ok(KeyedItem::new(key.clone(), data, now))
        })
        .collect()
}

fn timed_items(
    raw: &[Value],
    field: &str,
    now: DateTime<Utc>,
) -> Result<Vec<KeyedItem>, PollError> {
    raw.iter()
        .enumerate()
        .map(|(index, data)| {
            let value = lookup(data, field).ok_or_else(|| PollError::MissingOrderKey {
                field: field.to_string(),
                index,
            })?;
            let millis = epoch_millis(value).ok_or_else(|| PollError::InvalidTimestamp {
                field: field.to_string(),
                index,
            })?;
            Ok(KeyedItem::new(Value::from(millis), data, now))
        })
        .collect()
}

fn newest_by_time(items: Vec<KeyedItem>) -> Option<KeyedItem> {
    // First item wins ties, matching the newest-first source order.
    items.into_iter().reduce(|best, item| {
        if item.key.as_i64() > best.key.as_i64() {
            item
        } else {
            best
        }
    })
}

/// Deterministic id: ordering-key value, separator, SHA-256 of the payload.
pub fn item_id(key: &Value, data: &Value) -> String {
    let key_part = match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let content = serde_json::to_vec(data).unwrap_or_default();
    format!("{key_part}{ID_SEPARATOR}{:x}", Sha256::digest(&content))
}

/// Look up a dotted path (`a.b.c`) in a JSON object.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Order two ordering-key values.
///
/// Numbers compare numerically. Strings compare as instants when both parse
/// as RFC 3339, otherwise lexicographically. Mixed types are incomparable.
pub fn compare_keys(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

/// Whether `candidate` is strictly older than `reference` under `direction`.
pub fn is_older(candidate: &Value, reference: &Value, direction: OrderDirection) -> bool {
    matches!(
        (compare_keys(candidate, reference), direction),
        (Some(Ordering::Less), OrderDirection::Descending)
            | (Some(Ordering::Greater), OrderDirection::Ascending)
    )
}

fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

/// Validate that a connector's Run output is a list.
pub fn expect_items(output: Value) -> Result<Vec<Value>, PollError> {
    match output {
        Value::Array(items) => Ok(items),
        other => Err(PollError::NotAList(json_type_name(&other))),
    }
}
