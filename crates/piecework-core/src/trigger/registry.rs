//! In-process registry of enabled triggers.
//!
//! Webhook deliveries only carry a flow id; the registry maps it back to the
//! flow version snapshot captured when the trigger was enabled. It is local to
//! one worker process, so deployments with several webhook-receiving workers
//! must enable each flow on the worker that serves its URL.

use dashmap::DashMap;

use piecework_types::job::FlowVersionSnapshot;

#[derive(Default)]
pub struct EnabledTriggers {
    flows: DashMap<String, FlowVersionSnapshot>,
}

impl EnabledTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the enabled version of a flow.
    pub fn enable(&self, flow: FlowVersionSnapshot) {
        self.flows.insert(flow.flow_id.clone(), flow);
    }

    pub fn disable(&self, flow_id: &str) -> Option<FlowVersionSnapshot> {
        self.flows.remove(flow_id).map(|(_, flow)| flow)
    }

    pub fn get(&self, flow_id: &str) -> Option<FlowVersionSnapshot> {
        self.flows.get(flow_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::webhook_flow;
    use piecework_types::trigger::HandshakeStrategy;

    #[test]
    fn enable_get_disable() {
        let registry = EnabledTriggers::new();
        registry.enable(webhook_flow("flow-1", "demo", HandshakeStrategy::None));
        assert_eq!(registry.get("flow-1").unwrap().flow_id, "flow-1");
        assert!(registry.disable("flow-1").is_some());
        assert!(registry.get("flow-1").is_none());
        assert!(registry.is_empty());
    }
}
