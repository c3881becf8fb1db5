//! Load-time validation for configuration documents.
//!
//! Every check here is fatal: a document that fails validation never reaches
//! the reconciliation subsystem.

use std::collections::BTreeSet;

use crate::defaults::MIN_REFRESH_INTERVAL_MS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{AppConfig, ClusterConfig, DataCubeConfig, NATIVE_CLUSTER, RefreshRuleKind};

/// Validate a parsed document against the set of registered request decorators.
///
/// # Errors
///
/// Returns the first [`ConfigError`] encountered while walking clusters then
/// data cubes.
pub fn validate_config(config: &AppConfig, decorators: &BTreeSet<String>) -> ConfigResult<()> {
    let mut cluster_names = BTreeSet::new();
    for cluster in &config.clusters {
        validate_cluster(cluster, decorators)?;
        if !cluster_names.insert(cluster.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                section: "clusters",
                name: cluster.name.clone(),
            });
        }
    }

    let mut cube_names = BTreeSet::new();
    for cube in &config.data_cubes {
        validate_data_cube(cube)?;
        if !cube_names.insert(cube.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                section: "dataCubes",
                name: cube.name.clone(),
            });
        }
        if !cube.is_native() && !cluster_names.contains(cube.cluster_name.as_str()) {
            return Err(ConfigError::UnknownCluster {
                data_cube: cube.name.clone(),
                cluster: cube.cluster_name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_cluster(cluster: &ClusterConfig, decorators: &BTreeSet<String>) -> ConfigResult<()> {
    if cluster.name.trim().is_empty() {
        return Err(invalid(&cluster.name, "name", "must not be empty"));
    }
    if cluster.name == NATIVE_CLUSTER {
        return Err(ConfigError::ReservedName {
            name: cluster.name.clone(),
        });
    }
    if cluster.url.trim().is_empty() {
        return Err(invalid(&cluster.name, "url", "must not be empty"));
    }
    if cluster.timeout == 0 {
        return Err(invalid(&cluster.name, "timeout", "must be positive"));
    }
    if cluster.health_check_timeout == 0 {
        return Err(invalid(
            &cluster.name,
            "healthCheckTimeout",
            "must be positive",
        ));
    }
    check_interval(
        cluster,
        "sourceListRefreshInterval",
        cluster.source_list_refresh_interval,
    )?;
    check_interval(
        cluster,
        "sourceReintrospectInterval",
        cluster.source_reintrospect_interval,
    )?;
    if let Some(decorator) = &cluster.request_decorator
        && !decorators.contains(decorator)
    {
        return Err(ConfigError::UnknownDecorator {
            cluster: cluster.name.clone(),
            decorator: decorator.clone(),
        });
    }
    Ok(())
}

fn check_interval(cluster: &ClusterConfig, field: &'static str, value: u64) -> ConfigResult<()> {
    if value != 0 && value < MIN_REFRESH_INTERVAL_MS {
        return Err(ConfigError::IntervalTooSmall {
            cluster: cluster.name.clone(),
            field,
            floor: MIN_REFRESH_INTERVAL_MS,
            value,
        });
    }
    Ok(())
}

fn validate_data_cube(cube: &DataCubeConfig) -> ConfigResult<()> {
    if cube.name.trim().is_empty() {
        return Err(invalid(&cube.name, "name", "must not be empty"));
    }
    if cube.source.trim().is_empty() {
        return Err(invalid(&cube.name, "source", "must not be empty"));
    }
    if cube.refresh_rule.rule == RefreshRuleKind::Fixed && cube.refresh_rule.time.is_none() {
        return Err(invalid(
            &cube.name,
            "refreshRule",
            "fixed rule requires a time",
        ));
    }
    if let Some(filter) = &cube.subset_filter {
        if !cube.is_native() {
            return Err(invalid(
                &cube.name,
                "subsetFilter",
                "only applies to native data cubes",
            ));
        }
        if filter.attribute.trim().is_empty() {
            return Err(invalid(
                &cube.name,
                "subsetFilter",
                "attribute must not be empty",
            ));
        }
    }
    Ok(())
}

fn invalid(section: &str, field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidField {
        section: section.to_string(),
        field,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Engine, SubsetFilter};

    fn cluster(name: &str) -> ClusterConfig {
        ClusterConfig::new(name, Engine::Druid, "http://broker:8082")
    }

    fn config(clusters: Vec<ClusterConfig>, data_cubes: Vec<DataCubeConfig>) -> AppConfig {
        AppConfig {
            clusters,
            data_cubes,
            ..AppConfig::default()
        }
    }

    #[test]
    fn accepts_minimal_document() {
        let doc = config(
            vec![cluster("wiki")],
            vec![
                DataCubeConfig::new("edits", "wiki", "wikipedia"),
                DataCubeConfig::new("local", NATIVE_CLUSTER, "data/local.json"),
            ],
        );
        assert!(validate_config(&doc, &BTreeSet::new()).is_ok());
    }

    #[test]
    fn rejects_duplicate_cluster_names() {
        let doc = config(vec![cluster("wiki"), cluster("wiki")], Vec::new());
        let err = validate_config(&doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateName { section: "clusters", ref name } if name == "wiki"
        ));
    }

    #[test]
    fn rejects_reserved_cluster_name() {
        let doc = config(vec![cluster(NATIVE_CLUSTER)], Vec::new());
        let err = validate_config(&doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedName { .. }));
    }

    #[test]
    fn rejects_interval_below_floor_but_allows_zero() {
        let mut fast = cluster("fast");
        fast.source_list_refresh_interval = 999;
        let err = validate_config(&config(vec![fast], Vec::new()), &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::IntervalTooSmall {
                field: "sourceListRefreshInterval",
                floor: 1_000,
                value: 999,
                ..
            }
        ));

        let mut off = cluster("off");
        off.source_reintrospect_interval = 0;
        off.source_list_refresh_interval = 1_000;
        assert!(validate_config(&config(vec![off], Vec::new()), &BTreeSet::new()).is_ok());
    }

    #[test]
    fn rejects_unknown_cluster_reference() {
        let doc = config(
            vec![cluster("wiki")],
            vec![DataCubeConfig::new("edits", "other", "wikipedia")],
        );
        let err = validate_config(&doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCluster { ref cluster, .. } if cluster == "other"));
    }

    #[test]
    fn resolves_request_decorators_against_registry() {
        let mut decorated = cluster("wiki");
        decorated.request_decorator = Some("signer".to_string());
        let doc = config(vec![decorated], Vec::new());

        let err = validate_config(&doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDecorator { .. }));

        let registry = BTreeSet::from(["signer".to_string()]);
        assert!(validate_config(&doc, &registry).is_ok());
    }

    #[test]
    fn subset_filter_requires_native_cube() {
        let mut cube = DataCubeConfig::new("edits", "wiki", "wikipedia");
        cube.subset_filter = Some(SubsetFilter {
            attribute: "country".to_string(),
            values: vec![serde_json::json!("NZ")],
        });
        let doc = config(vec![cluster("wiki")], vec![cube]);
        let err = validate_config(&doc, &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "subsetFilter",
                ..
            }
        ));
    }

    #[test]
    fn fixed_refresh_rule_requires_time() {
        let mut cube = DataCubeConfig::new("edits", NATIVE_CLUSTER, "edits.json");
        cube.refresh_rule.rule = RefreshRuleKind::Fixed;
        let err = validate_config(&config(Vec::new(), vec![cube]), &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                field: "refreshRule",
                ..
            }
        ));
    }
}
