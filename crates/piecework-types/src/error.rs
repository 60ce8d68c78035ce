use thiserror::Error;

/// Errors from store operations (used by the port traits in piecework-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised while resolving worker configuration.
///
/// `UnknownExecutionMode` is fatal: the worker must refuse to start rather
/// than fall back to a default isolation strategy.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown execution mode '{0}' (expected UNSANDBOXED, SANDBOXED or SANDBOX_CODE_ONLY)")]
    UnknownExecutionMode(String),

    #[error("invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Errors raised by connector code or while resolving a connector.
///
/// Every variant surfaces to callers as `FailureReason::ConnectorFailure`.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("piece {name}@{version} is not installed")]
    PieceNotFound { name: String, version: String },

    #[error("invalid piece version '{0}'")]
    InvalidVersion(String),

    #[error("piece has no trigger named '{0}'")]
    UnknownTrigger(String),

    #[error("piece has no action named '{0}'")]
    UnknownAction(String),

    #[error("piece has no dynamic property '{0}'")]
    UnknownProperty(String),

    #[error("trigger '{trigger}' does not support the {hook} hook")]
    UnsupportedHook { trigger: String, hook: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl From<ConnectorError> for crate::engine::FailureReason {
    fn from(err: ConnectorError) -> Self {
        crate::engine::FailureReason::connector(err.to_string())
    }
}

/// Errors from the outbound collaborators (result reporting, flow runs, issues).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("queue closed")]
    QueueClosed,

    #[error("queue full")]
    QueueFull,
}
