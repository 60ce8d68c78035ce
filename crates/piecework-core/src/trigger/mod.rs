//! Trigger engine: hook protocol, polling dedup and webhook handshakes.

pub mod dedup;
pub mod failures;
pub mod handshake;
pub mod hooks;
pub mod locks;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod webhook_url;

pub use dedup::{PollDecision, PollError};
pub use failures::{FailureStreak, FailureTracker};
pub use hooks::{
    TriggerCollaborators, TriggerEngineSettings, TriggerHookService, WebhookDeliveryError,
};
pub use poller::{PollOutcome, PollReport, PollingEngine};
pub use ports::{FlowRunBatch, FlowRunDispatcher, IssueReporter, TriggerIssue};
pub use registry::EnabledTriggers;
pub use webhook_url::WebhookUrlResolver;
