//! Schema-bearing handles for cluster sources.

use serde::{Deserialize, Serialize};

use spyglass_config::{AttributeInfo, DataCubeConfig, Engine};

/// Everything known about one source on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct External {
    /// Engine serving the source.
    pub engine: Engine,
    /// Source name on the cluster.
    pub source: String,
    /// Engine version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Primary time attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_attribute: Option<String>,
    /// Columns exposed by the source.
    #[serde(default)]
    pub attributes: Vec<AttributeInfo>,
}

impl External {
    /// Stub for a source nothing is known about yet.
    #[must_use]
    pub fn stub(engine: Engine, source: impl Into<String>, version: Option<String>) -> Self {
        Self {
            engine,
            source: source.into(),
            version,
            time_attribute: None,
            attributes: Vec::new(),
        }
    }

    /// External described by a configured data cube.
    #[must_use]
    pub fn from_data_cube(engine: Engine, cube: &DataCubeConfig, version: Option<String>) -> Self {
        Self {
            engine,
            source: cube.source.clone(),
            version,
            time_attribute: cube.time_attribute.clone(),
            attributes: cube.attributes.clone(),
        }
    }

    /// Whether `other` describes the same schema.
    #[must_use]
    pub fn same_schema(&self, other: &Self) -> bool {
        self.time_attribute == other.time_attribute && self.attributes == other.attributes
    }
}

/// An external owned by a cluster manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedExternal {
    /// Name the external is published under.
    pub name: String,
    /// Current external.
    pub external: External,
    /// Whether it was found by a source-list scan rather than configured.
    pub auto_discovered: bool,
    /// Whether introspection is disabled for it.
    pub suppress_introspection: bool,
}

impl ManagedExternal {
    /// Managed external for a configured data cube.
    #[must_use]
    pub fn configured(engine: Engine, cube: &DataCubeConfig, version: Option<String>) -> Self {
        Self {
            name: cube.name.clone(),
            external: External::from_data_cube(engine, cube, version),
            auto_discovered: false,
            suppress_introspection: cube.introspection.suppresses_introspection(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_config::{AttributeType, IntrospectionPolicy};

    #[test]
    fn configured_external_follows_cube_policy() {
        let mut cube = DataCubeConfig::new("edits", "wiki", "wikipedia");
        cube.introspection = IntrospectionPolicy::None;
        cube.time_attribute = Some("__time".to_string());
        let managed = ManagedExternal::configured(Engine::Druid, &cube, Some("0.20".to_string()));
        assert_eq!(managed.name, "edits");
        assert_eq!(managed.external.source, "wikipedia");
        assert!(managed.suppress_introspection);
        assert!(!managed.auto_discovered);
    }

    #[test]
    fn same_schema_ignores_version() {
        let mut a = External::stub(Engine::Druid, "wikipedia", None);
        a.attributes
            .push(AttributeInfo::new("page", AttributeType::String));
        let mut b = a.clone();
        b.version = Some("0.21".to_string());
        assert!(a.same_schema(&b));
        b.attributes
            .push(AttributeInfo::new("added", AttributeType::Number));
        assert!(!a.same_schema(&b));
    }
}
