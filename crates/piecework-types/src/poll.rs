//! Polling trigger state: fetched items and the persisted dedup cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One candidate item returned by a polling connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollItem {
    /// `orderKey + '|' + sha256(data)`. Stable across polls of unchanged data.
    pub id: String,
    pub data: Value,
    pub observed_at: DateTime<Utc>,
}

/// Per-(flow, trigger) pointer at the newest item already delivered.
///
/// `last_item_id == None` is a valid, enabled cursor over an empty source:
/// everything on the next poll is new.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupCursor {
    #[serde(default)]
    pub last_item_id: Option<String>,
    /// Ordering-key value of `last_item_id` (or the newest epoch for time-based dedup).
    #[serde(default)]
    pub last_order_key: Option<Value>,
    pub last_observed_at: DateTime<Utc>,
}

impl DedupCursor {
    /// Cursor for a trigger enabled against an empty source.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            last_item_id: None,
            last_order_key: None,
            last_observed_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.last_item_id.is_none()
    }
}

/// A stored cursor plus the version used for compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedCursor {
    pub cursor: DedupCursor,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_tolerates_missing_optional_fields() {
        let cursor: DedupCursor =
            serde_json::from_value(json!({"last_observed_at": "2024-01-01T00:00:00Z"})).unwrap();
        assert!(cursor.is_empty());
        assert!(cursor.last_order_key.is_none());
    }

    #[test]
    fn empty_cursor_has_no_item() {
        let cursor = DedupCursor::empty(Utc::now());
        assert!(cursor.is_empty());
    }
}
