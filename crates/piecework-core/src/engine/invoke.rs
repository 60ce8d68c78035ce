//! Statically typed dispatch from an [`EngineCall`] to a connector entry point.
//!
//! Shared by the in-process strategy and the sandbox child so that both
//! sides of the isolation boundary run the exact same routing.

use serde::Serialize;
use serde_json::Value;

use piecework_types::engine::{EngineCall, FailureReason};

use crate::connector::ConnectorRegistry;

/// Resolve the piece and run the call against it.
pub async fn invoke_connector(
    registry: &ConnectorRegistry,
    call: EngineCall,
) -> Result<Value, FailureReason> {
    let connector = registry.resolve(call.piece())?;

    match call {
        EngineCall::ValidateAuth { auth, .. } => {
            let validation = connector.validate_auth(&auth).await?;
            to_output(&validation)
        }
        EngineCall::ExtractPieceMetadata { .. } => to_output(connector.metadata()),
        EngineCall::TriggerHook { invocation, .. } => {
            Ok(connector.trigger_hook(&invocation).await?)
        }
        EngineCall::Action { invocation, .. } => Ok(connector.run_action(&invocation).await?),
        EngineCall::Property { invocation, .. } => {
            Ok(connector.resolve_property(&invocation).await?)
        }
    }
}

fn to_output<T: Serialize>(value: &T) -> Result<Value, FailureReason> {
    serde_json::to_value(value)
        .map_err(|e| FailureReason::connector(format!("unserializable connector output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;
    use piecework_types::job::PieceRef;
    use serde_json::json;

    #[tokio::test]
    async fn metadata_is_serialized() {
        let registry = ConnectorRegistry::new();
        registry.register(ScriptedConnector::new("demo", "0.3.0"));

        let output = invoke_connector(
            &registry,
            EngineCall::ExtractPieceMetadata {
                piece: PieceRef::new("demo", "^0.3"),
            },
        )
        .await
        .unwrap();

        assert_eq!(output["name"], "demo");
        assert_eq!(output["version"], "0.3.0");
    }

    #[tokio::test]
    async fn validate_auth_returns_validation_object() {
        let registry = ConnectorRegistry::new();
        registry.register(ScriptedConnector::new("demo", "0.3.0"));

        let output = invoke_connector(
            &registry,
            EngineCall::ValidateAuth {
                piece: PieceRef::new("demo", "0.3.0"),
                auth: json!({"token": "bad"}),
            },
        )
        .await
        .unwrap();

        assert_eq!(output["valid"], false);
    }

    #[tokio::test]
    async fn missing_piece_is_connector_failure() {
        let registry = ConnectorRegistry::new();
        let err = invoke_connector(
            &registry,
            EngineCall::ExtractPieceMetadata {
                piece: PieceRef::new("nope", "*"),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FailureReason::ConnectorFailure { .. }));
    }
}
