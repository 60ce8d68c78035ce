//! Engine-level types: execution modes, engine calls, results and failures.
//!
//! An [`EngineCall`] is the unit of work handed to an isolation strategy. It is
//! serializable because the sandboxed strategy ships it to a child process
//! over stdin. Every call produces exactly one [`EngineResult`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;
use crate::job::PieceRef;
use crate::trigger::HookType;

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// Process-wide isolation policy, resolved once at worker start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutionMode {
    /// Connector code runs in-process on a tokio task. Trusted deployments only.
    Unsandboxed,
    /// Every connector call runs in an isolated child process.
    Sandboxed,
    /// Only code pieces are sandboxed; all other pieces run in-process.
    SandboxCodeOnly,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Unsandboxed => "UNSANDBOXED",
            ExecutionMode::Sandboxed => "SANDBOXED",
            ExecutionMode::SandboxCodeOnly => "SANDBOX_CODE_ONLY",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    /// Parse a mode name. Case-insensitive; `-` and `_` are interchangeable.
    /// Anything else is a fatal configuration error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "UNSANDBOXED" => Ok(ExecutionMode::Unsandboxed),
            "SANDBOXED" => Ok(ExecutionMode::Sandboxed),
            "SANDBOX_CODE_ONLY" => Ok(ExecutionMode::SandboxCodeOnly),
            _ => Err(ConfigError::UnknownExecutionMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for ExecutionMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExecutionMode> for String {
    fn from(mode: ExecutionMode) -> Self {
        mode.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Typed failure carried by an unsuccessful [`EngineResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The call exceeded its wall-clock budget.
    #[error("execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    /// Connector code panicked, errored, or the piece could not be resolved.
    #[error("connector failure: {message}")]
    ConnectorFailure { message: String },

    /// Connector returned a value of the wrong shape for the hook.
    #[error("invalid output shape: expected {expected}, got {actual}")]
    InvalidOutputShape { expected: String, actual: String },

    /// A concurrent writer advanced the dedup cursor first.
    #[error("dedup cursor conflict on '{key}'")]
    CursorConflict { key: String },

    /// Process-level misconfiguration.
    #[error("configuration error: {message}")]
    ConfigurationError { message: String },

    /// The cursor store or a downstream collaborator failed on the host side.
    #[error("host failure: {message}")]
    HostFailure { message: String },
}

impl FailureReason {
    pub fn connector(message: impl Into<String>) -> Self {
        FailureReason::ConnectorFailure {
            message: message.into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        FailureReason::HostFailure {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        FailureReason::ExecutionTimeout { timeout_ms }
    }

    /// Build an `InvalidOutputShape` from the offending value.
    pub fn invalid_shape(expected: impl Into<String>, actual: &Value) -> Self {
        FailureReason::InvalidOutputShape {
            expected: expected.into(),
            actual: json_type_name(actual).to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureReason::ExecutionTimeout { .. })
    }

    /// Whether the failure counts against the flow's consecutive-failure counter.
    ///
    /// Connector bugs and timeouts do; cursor conflicts are retried on the next
    /// tick, host failures are not the connector's fault and configuration
    /// errors are process-level.
    pub fn counts_against_flow(&self) -> bool {
        matches!(
            self,
            FailureReason::ExecutionTimeout { .. }
                | FailureReason::ConnectorFailure { .. }
                | FailureReason::InvalidOutputShape { .. }
        )
    }
}

/// JSON type name used in shape-mismatch messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// EngineResult
// ---------------------------------------------------------------------------

/// Outcome of one isolation-strategy call.
///
/// `success == false` always carries a failure reason. The constructors
/// enforce this, and deserialization repairs a reason-less failure coming
/// from an untrusted boundary instead of dropping the information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EngineResultWire")]
pub struct EngineResult {
    success: bool,
    output: Option<Value>,
    failure_reason: Option<FailureReason>,
    duration_ms: u64,
}

#[derive(Deserialize)]
struct EngineResultWire {
    success: bool,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    failure_reason: Option<FailureReason>,
    #[serde(default)]
    duration_ms: u64,
}

impl From<EngineResultWire> for EngineResult {
    fn from(wire: EngineResultWire) -> Self {
        match (wire.success, wire.failure_reason) {
            (true, None) => EngineResult::ok(wire.output, wire.duration_ms),
            (_, Some(reason)) => EngineResult {
                success: false,
                output: wire.output,
                failure_reason: Some(reason),
                duration_ms: wire.duration_ms,
            },
            (false, None) => EngineResult::failed(
                FailureReason::connector("engine reported failure without a reason"),
                wire.duration_ms,
            ),
        }
    }
}

impl EngineResult {
    pub fn ok(output: Option<Value>, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            failure_reason: None,
            duration_ms,
        }
    }

    pub fn failed(reason: FailureReason, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            failure_reason: Some(reason),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.failure_reason.as_ref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Build from a connector outcome plus the measured duration.
    pub fn from_result(result: Result<Value, FailureReason>, duration_ms: u64) -> Self {
        match result {
            Ok(output) => EngineResult::ok(Some(output), duration_ms),
            Err(reason) => EngineResult::failed(reason, duration_ms),
        }
    }

    /// Convert into a `Result`, yielding the output (or `Null`) on success.
    pub fn into_result(self) -> Result<Value, FailureReason> {
        match self.failure_reason {
            Some(reason) => Err(reason),
            None => Ok(self.output.unwrap_or(Value::Null)),
        }
    }
}

impl From<Result<Value, FailureReason>> for EngineResult {
    fn from(result: Result<Value, FailureReason>) -> Self {
        EngineResult::from_result(result, 0)
    }
}

// ---------------------------------------------------------------------------
// EngineCall
// ---------------------------------------------------------------------------

/// Input to a trigger hook on a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerHookInvocation {
    pub flow_id: String,
    pub project_id: String,
    pub trigger_name: String,
    pub hook: HookType,
    /// Trigger properties configured by the user.
    #[serde(default)]
    pub input: Value,
    /// Externally reachable URL the connector should register with the third party.
    pub webhook_url: String,
    /// Raw webhook payload (Run/Handshake on webhook triggers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Input to an action on a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInvocation {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    pub action_name: String,
    #[serde(default)]
    pub input: Value,
}

/// Input to a dynamic property resolver on a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInvocation {
    pub project_id: String,
    /// The action or trigger that declares the property.
    pub step_name: String,
    pub property_name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_value: Option<String>,
}

/// One connector call, as executed by an isolation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineCall {
    ValidateAuth { piece: PieceRef, auth: Value },
    ExtractPieceMetadata { piece: PieceRef },
    TriggerHook {
        piece: PieceRef,
        invocation: TriggerHookInvocation,
    },
    Action {
        piece: PieceRef,
        invocation: ActionInvocation,
    },
    Property {
        piece: PieceRef,
        invocation: PropertyInvocation,
    },
}

impl EngineCall {
    pub fn piece(&self) -> &PieceRef {
        match self {
            EngineCall::ValidateAuth { piece, .. }
            | EngineCall::ExtractPieceMetadata { piece }
            | EngineCall::TriggerHook { piece, .. }
            | EngineCall::Action { piece, .. }
            | EngineCall::Property { piece, .. } => piece,
        }
    }

    /// Short label for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EngineCall::ValidateAuth { .. } => "validate_auth",
            EngineCall::ExtractPieceMetadata { .. } => "extract_piece_metadata",
            EngineCall::TriggerHook { .. } => "trigger_hook",
            EngineCall::Action { .. } => "action",
            EngineCall::Property { .. } => "property",
        }
    }
}
