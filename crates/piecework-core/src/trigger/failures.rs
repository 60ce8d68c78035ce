//! Consecutive-failure counting per flow.

use dashmap::DashMap;

/// Result of recording one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureStreak {
    pub consecutive: u32,
    /// True exactly once per streak: when the count first reaches the threshold.
    pub threshold_reached: bool,
}

pub struct FailureTracker {
    threshold: u32,
    counters: DashMap<String, u32>,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counters: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn record_failure(&self, flow_id: &str) -> FailureStreak {
        let mut count = self.counters.entry(flow_id.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        FailureStreak {
            consecutive: *count,
            threshold_reached: *count == self.threshold,
        }
    }

    /// A successful invocation ends the streak.
    pub fn record_success(&self, flow_id: &str) {
        self.counters.remove(flow_id);
    }

    pub fn reset(&self, flow_id: &str) {
        self.counters.remove(flow_id);
    }

    pub fn consecutive(&self, flow_id: &str) -> u32 {
        self.counters.get(flow_id).map(|c| *c).unwrap_or(0)
    }
}
