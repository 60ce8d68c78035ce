//! Connector registry: `(piece name, version)` to callable entry points.
//!
//! A piece may be installed in several versions. Lookups accept an exact
//! version (`1.2.3`) or a semver requirement (`^1.2`, `~0.3`, `*`) and resolve
//! to the highest installed version that satisfies it.

use std::collections::BTreeMap;

use dashmap::DashMap;
use semver::{Version, VersionReq};

use piecework_types::error::ConnectorError;
use piecework_types::job::PieceRef;

use super::box_connector::BoxConnector;
use super::piece::Connector;

/// Installed pieces, indexed by name then version.
#[derive(Default)]
pub struct ConnectorRegistry {
    pieces: DashMap<String, BTreeMap<Version, BoxConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a connector under the name and version from its metadata.
    ///
    /// Re-registering the same version replaces the previous connector.
    pub fn register<T: Connector + 'static>(&self, connector: T) {
        self.register_boxed(BoxConnector::new(connector));
    }

    pub fn register_boxed(&self, connector: BoxConnector) {
        let name = connector.metadata().name.clone();
        let version = connector.metadata().version.clone();
        tracing::debug!(piece = %name, version = %version, "registered piece");
        self.pieces
            .entry(name)
            .or_default()
            .insert(version, connector);
    }

    /// Resolve a piece reference to a connector handle.
    pub fn resolve(&self, piece: &PieceRef) -> Result<BoxConnector, ConnectorError> {
        let not_found = || ConnectorError::PieceNotFound {
            name: piece.name.clone(),
            version: piece.version.clone(),
        };

        let versions = self.pieces.get(&piece.name).ok_or_else(not_found)?;

        if let Ok(exact) = Version::parse(piece.version.trim()) {
            return versions.get(&exact).cloned().ok_or_else(not_found);
        }

        let requirement = VersionReq::parse(piece.version.trim())
            .map_err(|_| ConnectorError::InvalidVersion(piece.version.clone()))?;

        versions
            .iter()
            .rev()
            .find(|(version, _)| requirement.matches(version))
            .map(|(_, connector)| connector.clone())
            .ok_or_else(not_found)
    }

    /// All installed `(name, version)` pairs, sorted.
    pub fn list(&self) -> Vec<PieceRef> {
        let mut refs: Vec<PieceRef> = self
            .pieces
            .iter()
            .flat_map(|entry| {
                let name = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(|version| PieceRef::new(name.clone(), version.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
        refs
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}
