//! Piece (connector) metadata as reported by `ExtractPieceMetadata`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trigger::{HandshakeStrategy, TriggerStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceMetadata {
    pub name: String,
    pub display_name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

impl PieceMetadata {
    pub fn trigger(&self, name: &str) -> Option<&TriggerDefinition> {
        self.triggers.iter().find(|t| t.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub name: String,
    pub display_name: String,
    pub strategy: TriggerStrategy,
    #[serde(default)]
    pub handshake: HandshakeStrategy,
    /// Whether the worker should schedule periodic `Renew` hooks.
    #[serde(default)]
    pub requires_renewal: bool,
    /// Returned by the `Test` hook when the connector has nothing better.
    #[serde(default)]
    pub sample_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
}

/// Output of `ValidateAuth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthValidation {
    pub fn valid() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let meta = PieceMetadata {
            name: "catch-webhook".to_string(),
            display_name: "Catch Webhook".to_string(),
            version: semver::Version::new(0, 1, 0),
            description: String::new(),
            triggers: vec![TriggerDefinition {
                name: "catch_request".to_string(),
                display_name: "Catch Request".to_string(),
                strategy: TriggerStrategy::Webhook,
                handshake: HandshakeStrategy::None,
                requires_renewal: false,
                sample_data: Value::Null,
            }],
            actions: vec![],
        };
        assert!(meta.trigger("catch_request").is_some());
        assert!(meta.trigger("missing").is_none());
        assert!(meta.action("echo").is_none());
    }

    #[test]
    fn invalid_auth_carries_error() {
        let v = AuthValidation::invalid("bad token");
        assert!(!v.valid);
        assert_eq!(v.error.as_deref(), Some("bad token"));
        assert!(AuthValidation::valid().valid);
    }
}
